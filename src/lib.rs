pub mod aggregator;
pub mod angle_filter;
pub mod config;
pub mod csv_loader;
pub mod error;
pub mod exercise_classifier;
pub mod feature_extractor;
pub mod feature_window;
pub mod form_evaluator;
pub mod pipeline;
pub mod profile;
pub mod rep_counter;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod synthetic;

pub use aggregator::{AnalysisResult, KeyFrame, PerformanceLevel};
pub use config::AnalysisConfig;
pub use error::{AnalysisError, ConfigError, InsufficientData};
pub use pipeline::{AnalysisRun, Analyzer};
pub use session::{FormTrend, Pace, SessionSummary};
pub use types::{Exercise, ExerciseLabel, Joint, Landmark, LandmarkFrame, RunMetadata};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
