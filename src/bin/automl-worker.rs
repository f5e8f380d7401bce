//! Worker CLI: submit jobs, run them and inspect their records.
//!
//! Job failures are reported through the record and still exit with status 0;
//! only usage and setup problems exit non-zero.

use std::path::PathBuf;

use automl_worker::app_dirs;
use automl_worker::commands::Worker;
use automl_worker::config::{self, WorkerConfig};
use automl_worker::dataset::{InputDataType, LabelStrategy, PreprocessingConfig};
use automl_worker::evaluation::{EvaluationConfig, ScoringStrategy};
use automl_worker::jobs::{JobId, JobRecord};
use automl_worker::logging;
use automl_worker::training::{NearestCentroid, TrainingConfig};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let (globals, args) = take_global_flags(std::env::args().skip(1).collect())?;
    if let Some(home) = globals.home {
        app_dirs::set_base_override(home);
    }
    let Some((command, rest)) = args.split_first() else {
        return Err(help_text());
    };
    if matches!(command.as_str(), "-h" | "--help" | "help") {
        println!("{}", help_text());
        return Ok(());
    }

    let config = load_config(globals.config)?;
    if let Err(err) = logging::init(&config.logging) {
        eprintln!("Logging disabled: {err}");
    }
    let worker = Worker::open(config).map_err(|err| err.to_string())?;

    match command.as_str() {
        "submit-preprocess" => {
            let record = worker
                .submit_preprocessing(parse_preprocess(rest)?)
                .map_err(|err| err.to_string())?;
            println!("{}", record.id());
        }
        "submit-train" => {
            let record = worker
                .submit_training(parse_train(rest)?)
                .map_err(|err| err.to_string())?;
            println!("{}", record.id());
        }
        "submit-eval" => {
            let record = worker
                .submit_evaluation(parse_eval(rest)?)
                .map_err(|err| err.to_string())?;
            println!("{}", record.id());
        }
        "run" => {
            let id = parse_id(rest.first(), "run")?;
            let record = worker.run_job(id).map_err(|err| err.to_string())?;
            print_record(&record);
        }
        "status" => match rest.first() {
            Some(_) => {
                let id = parse_id(rest.first(), "status")?;
                print_record(&worker.job(id).map_err(|err| err.to_string())?);
            }
            None => {
                for record in worker.list_jobs().map_err(|err| err.to_string())? {
                    print_summary(&record);
                }
            }
        },
        "reconcile" => {
            let failed = worker.reconcile().map_err(|err| err.to_string())?;
            println!("failed {} abandoned job(s)", failed.len());
            for id in failed {
                println!("  {id}");
            }
        }
        unknown => return Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    }
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<WorkerConfig, String> {
    match path {
        Some(path) => config::load_from_path(&path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())
}

#[derive(Debug, Default)]
struct GlobalFlags {
    config: Option<PathBuf>,
    home: Option<PathBuf>,
}

/// Pull `--config <file>` and `--home <dir>` out of the argument list wherever they appear.
fn take_global_flags(args: Vec<String>) -> Result<(GlobalFlags, Vec<String>), String> {
    let mut globals = GlobalFlags::default();
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let slot = match arg.as_str() {
            "--config" => &mut globals.config,
            "--home" => &mut globals.home,
            _ => {
                rest.push(arg);
                continue;
            }
        };
        let value = iter
            .next()
            .ok_or_else(|| format!("{arg} requires a value"))?;
        *slot = Some(PathBuf::from(value));
    }
    Ok((globals, rest))
}

fn parse_id(value: Option<&String>, command: &str) -> Result<JobId, String> {
    let value = value.ok_or_else(|| format!("{command} requires a job id"))?;
    value
        .parse::<i64>()
        .map(JobId)
        .map_err(|_| format!("Invalid job id: {value}"))
}

fn value<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str, String> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_preprocess(args: &[String]) -> Result<PreprocessingConfig, String> {
    let mut input_folder: Option<PathBuf> = None;
    let mut input_data_type: Option<InputDataType> = None;
    let mut label_strategy: Option<LabelStrategy> = None;
    let mut positive_class: Option<String> = None;
    let mut seed: Option<u64> = None;
    let mut audio_frames = 16_000usize;
    let mut image_size = [32u32, 32];
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        match flag {
            "--input" => {
                idx += 1;
                input_folder = Some(PathBuf::from(value(args, idx, flag)?));
            }
            "--type" => {
                idx += 1;
                input_data_type = Some(match value(args, idx, flag)? {
                    "image" => InputDataType::Image,
                    "audio" => InputDataType::Audio,
                    other => return Err(format!("Invalid --type value: {other}")),
                });
            }
            "--label" => {
                idx += 1;
                let raw = value(args, idx, flag)?;
                label_strategy = Some(match raw.split_once(':') {
                    None if raw == "parent" => LabelStrategy::ParentDirectory,
                    Some(("prefix", separator)) => LabelStrategy::FileStemPrefix {
                        separator: separator.to_string(),
                    },
                    _ => return Err(format!("Invalid --label value: {raw}")),
                });
            }
            "--binarize" => {
                idx += 1;
                positive_class = Some(value(args, idx, flag)?.to_string());
            }
            "--seed" => {
                idx += 1;
                let raw = value(args, idx, flag)?;
                seed = Some(
                    raw.parse::<u64>()
                        .map_err(|_| format!("Invalid --seed value: {raw}"))?,
                );
            }
            "--frames" => {
                idx += 1;
                let raw = value(args, idx, flag)?;
                audio_frames = raw
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid --frames value: {raw}"))?;
            }
            "--size" => {
                idx += 1;
                let raw = value(args, idx, flag)?;
                let parsed = raw
                    .split_once('x')
                    .and_then(|(w, h)| Some([w.parse().ok()?, h.parse().ok()?]));
                image_size = parsed.ok_or_else(|| format!("Invalid --size value: {raw}"))?;
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(PreprocessingConfig {
        input_folder: input_folder.ok_or_else(|| "--input is required".to_string())?,
        input_data_type: input_data_type.ok_or_else(|| "--type is required".to_string())?,
        label_strategy: label_strategy.ok_or_else(|| "--label is required".to_string())?,
        binarize: positive_class.is_some(),
        positive_class,
        seed,
        audio_frames,
        image_size,
    })
}

fn parse_train(args: &[String]) -> Result<TrainingConfig, String> {
    let mut input_data_path: Option<PathBuf> = None;
    let mut labels_path: Option<PathBuf> = None;
    let mut backend = NearestCentroid::NAME.to_string();
    let mut verbose = false;
    let mut time_limit_secs: Option<u64> = None;
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        match flag {
            "--features" => {
                idx += 1;
                input_data_path = Some(PathBuf::from(value(args, idx, flag)?));
            }
            "--labels" => {
                idx += 1;
                labels_path = Some(PathBuf::from(value(args, idx, flag)?));
            }
            "--backend" => {
                idx += 1;
                backend = value(args, idx, flag)?.to_string();
            }
            "--verbose" => verbose = true,
            "--time-limit" => {
                idx += 1;
                let raw = value(args, idx, flag)?;
                time_limit_secs = Some(
                    raw.parse::<u64>()
                        .map_err(|_| format!("Invalid --time-limit value: {raw}"))?,
                );
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(TrainingConfig {
        input_data_path: input_data_path.ok_or_else(|| "--features is required".to_string())?,
        labels_path: labels_path.ok_or_else(|| "--labels is required".to_string())?,
        backend,
        verbose,
        time_limit_secs,
    })
}

fn parse_eval(args: &[String]) -> Result<EvaluationConfig, String> {
    let mut model_path: Option<PathBuf> = None;
    let mut features_path: Option<PathBuf> = None;
    let mut labels_path: Option<PathBuf> = None;
    let mut scoring_strategy = ScoringStrategy::default();
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        match flag {
            "--model" => {
                idx += 1;
                model_path = Some(PathBuf::from(value(args, idx, flag)?));
            }
            "--features" => {
                idx += 1;
                features_path = Some(PathBuf::from(value(args, idx, flag)?));
            }
            "--labels" => {
                idx += 1;
                labels_path = Some(PathBuf::from(value(args, idx, flag)?));
            }
            "--scoring" => {
                idx += 1;
                scoring_strategy = value(args, idx, flag)?.parse()?;
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(EvaluationConfig {
        model_path: model_path.ok_or_else(|| "--model is required".to_string())?,
        features_path: features_path.ok_or_else(|| "--features is required".to_string())?,
        labels_path: labels_path.ok_or_else(|| "--labels is required".to_string())?,
        scoring_strategy,
    })
}

fn print_summary(record: &JobRecord) {
    let elapsed = record
        .training_time()
        .map(|t| format!("{:.3}s", t.as_secs_f64()))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>6}  {:<13}  {:<11}  {elapsed}",
        record.id().0,
        record.kind().as_str(),
        record.status().as_str()
    );
}

fn print_record(record: &JobRecord) {
    print_summary(record);
    for artifact in record.artifacts() {
        println!("  {:<26} {}", artifact.name, artifact.path.display());
    }
    for (name, value) in record.metrics() {
        println!("  {name:<26} {value}");
    }
    if let Some(remarks) = record.additional_remarks() {
        println!("  remarks: {remarks}");
    }
}

fn help_text() -> String {
    [
        "automl-worker",
        "",
        "Submits, runs and inspects preprocessing, training and evaluation jobs.",
        "",
        "Usage:",
        "  automl-worker [--config <file>] <command> [options]",
        "",
        "Commands:",
        "  submit-preprocess --input <dir> --type image|audio --label parent|prefix:<sep>",
        "                    [--binarize <positive class>] [--seed <u64>]",
        "                    [--frames <n>] [--size <w>x<h>]",
        "  submit-train      --features <npy> --labels <npy> [--backend <name>]",
        "                    [--verbose] [--time-limit <secs>]",
        "  submit-eval       --model <dump> --features <npy> --labels <npy>",
        "                    [--scoring accuracy|balanced_accuracy|macro_f1]",
        "  run <id>          Run a waiting job and print its terminal record.",
        "  status [id]       Show one job, or list all jobs.",
        "  reconcile         Fail in-progress jobs older than reconcile.stale_after_secs.",
        "",
        "Options:",
        "  --config <file>   Worker config (default: worker.toml in the app folder).",
        "  --home <dir>      Base folder for the app folder (overrides AUTOML_WORKER_HOME).",
    ]
    .join("\n")
}
