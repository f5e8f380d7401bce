use std::path::Path;

pub fn write_test_wav(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create wav parent dirs");
    }
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav writer");
    for &sample in samples {
        writer.write_sample(sample).expect("write wav sample");
    }
    writer.finalize().expect("finalize wav");
}

pub fn write_test_png(path: &Path, width: u32, height: u32, level: u8) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create png parent dirs");
    }
    image::GrayImage::from_pixel(width, height, image::Luma([level]))
        .save(path)
        .expect("write png");
}

/// `per_class` constant-level clips in `<root>/<class>/`, one folder per class.
///
/// Each class gets a distinct amplitude so a nearest-centroid model can
/// separate them.
pub fn write_audio_classes(root: &Path, classes: &[&str], per_class: usize, frames: usize) {
    for (class_idx, class) in classes.iter().enumerate() {
        let level = (class_idx as f32 + 1.0) / (classes.len() as f32 + 1.0);
        for clip in 0..per_class {
            let wobble = clip as f32 * 0.001;
            let samples = vec![level + wobble; frames];
            write_test_wav(&root.join(class).join(format!("{class}_{clip:02}.wav")), &samples);
        }
    }
}
