//! Library exports for the labeling binary, benchmarks and tests.
/// Active-learning loop and batch selection.
pub mod active;
/// Application directory helpers.
pub mod app_dirs;
/// Session configuration.
pub mod config;
/// Feature tables, validation splits and flight files.
pub mod dataset;
/// Label names and the label ledger.
pub mod labeling;
/// Logging setup.
pub mod logging;
/// Classifier and metrics.
pub mod ml;
/// Text-driven labeling session.
pub mod session;
