use thiserror::Error;

use crate::types::Exercise;

/// Motivo por el que una ejecución no da un resultado fiable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InsufficientData {
    #[error("{valid} usable frames, at least {required} required")]
    TooFewValidFrames { valid: usize, required: usize },

    #[error("exercise never identified (best confidence {best_confidence:.2})")]
    ClassifierNeverStabilized { best_confidence: f32 },
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid landmark data in frame {frame}: {reason}")]
    InvalidLandmarkData { frame: usize, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(#[from] InsufficientData),

    #[error("Exercise {0} is not in the configured exercise set")]
    UnsupportedExercise(Exercise),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_messages() {
        let err = AnalysisError::from(InsufficientData::TooFewValidFrames { valid: 5, required: 30 });
        assert_eq!(err.to_string(), "Insufficient data: 5 usable frames, at least 30 required");

        let reason = InsufficientData::ClassifierNeverStabilized { best_confidence: 0.4321 };
        assert_eq!(reason.to_string(), "exercise never identified (best confidence 0.43)");
        assert!(std::error::Error::source(&AnalysisError::from(reason)).is_some());
    }
}
