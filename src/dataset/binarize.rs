/// Map each label to `1` if it equals `positive` exactly, else `0`.
///
/// No trimming or case folding: `"Dog"` and `"dog"` are different classes.
pub fn binarize<L: PartialEq>(labels: &[L], positive: &L) -> Vec<i64> {
    labels
        .iter()
        .map(|label| i64::from(label == positive))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn marks_exact_matches_only() {
        let labels = labels(&["perfect_condition", "cracked", "Perfect_condition", "perfect_condition "]);
        let positive = "perfect_condition".to_string();
        assert_eq!(binarize(&labels, &positive), vec![1, 0, 0, 0]);
    }

    #[test]
    fn keeps_length_and_order() {
        let labels = labels(&["a", "b", "a", "c", "a"]);
        let result = binarize(&labels, &"a".to_string());
        assert_eq!(result.len(), labels.len());
        for (label, bit) in labels.iter().zip(&result) {
            assert_eq!(*bit == 1, label == "a");
        }
    }

    #[test]
    fn empty_labels_give_empty_result() {
        assert!(binarize::<String>(&[], &"a".to_string()).is_empty());
    }
}
