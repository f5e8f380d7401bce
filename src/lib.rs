//! Job lifecycle and data-split pipeline for AutoML training workers.
/// Application directory resolution.
pub mod app_dirs;
/// Command interface used by the binary and admin surfaces.
pub mod commands;
/// Worker configuration loading.
pub mod config;
/// Train/validation splitting, label binarization and artifact storage.
pub mod dataset;
/// Scoring trained models against held-out data.
pub mod evaluation;
/// Job records, persistence and the executor containment boundary.
pub mod jobs;
/// Tracing subscriber setup.
pub mod logging;
/// Compute backends and the training step.
pub mod training;
