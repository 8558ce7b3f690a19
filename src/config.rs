use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::exercise_classifier::ClassifierParams;
use crate::feature_extractor::ExtractorParams;
use crate::profile::{builtin_profiles, generic_rules, ExerciseProfile, FormRule};
use crate::session::SessionParams;
use crate::types::{Exercise, RunMetadata};

/// Todo lo ajustable de un análisis. Los campos ausentes del fichero toman los
/// valores por defecto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Articulaciones por debajo de esta visibilidad se ignoran
    pub visibility_threshold: f32,
    pub classifier: ClassifierParams,
    /// Frames útiles necesarios para dar resultado
    pub min_valid_frames: usize,
    pub max_key_frames: usize,
    /// Features retenidas mientras el ejercicio es desconocido
    pub max_pending_frames: usize,
    /// Ejercicios que evalúa esta instalación
    pub exercises: Vec<Exercise>,
    pub profiles: Vec<ExerciseProfile>,
    /// Reglas aplicadas sea cual sea el ejercicio
    pub generic_rules: Vec<FormRule>,
    pub session: SessionParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: 0.5,
            classifier: ClassifierParams::default(),
            min_valid_frames: 30,
            max_key_frames: 5,
            max_pending_frames: 300,
            exercises: Exercise::KNOWN.to_vec(),
            profiles: builtin_profiles(),
            generic_rules: generic_rules(),
            session: SessionParams::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.visibility_threshold) {
            return Err(ConfigError::invalid("visibility_threshold", "must lie in [0, 1]"));
        }

        let c = &self.classifier;
        if c.window_size == 0 || c.classify_every == 0 || c.reclassify_every == 0 {
            return Err(ConfigError::invalid("classifier", "window and intervals must be positive"));
        }
        if c.stable_votes == 0 || c.collapse_patience == 0 {
            return Err(ConfigError::invalid("classifier", "vote counts must be positive"));
        }
        if !(0.0..=1.0).contains(&c.min_confidence) || !(0.0..=1.0).contains(&c.min_match_score) {
            return Err(ConfigError::invalid("classifier", "confidences must lie in [0, 1]"));
        }

        if self.min_valid_frames == 0 {
            return Err(ConfigError::invalid("min_valid_frames", "must be positive"));
        }
        if self.max_pending_frames < c.window_size {
            return Err(ConfigError::invalid(
                "max_pending_frames",
                format!("must hold at least one classifier window ({})", c.window_size),
            ));
        }

        let s = &self.session;
        if s.trend_window < 2 || s.fatigue_window < 2 {
            return Err(ConfigError::invalid("session", "trend and fatigue windows need at least 2 reps"));
        }
        if s.slow_pace > s.fast_pace {
            return Err(ConfigError::invalid("session", "slow_pace must not exceed fast_pace"));
        }

        for (i, profile) in self.profiles.iter().enumerate() {
            if self.profiles[..i].iter().any(|p| p.exercise == profile.exercise) {
                return Err(ConfigError::invalid(
                    "profiles",
                    format!("duplicate profile for {}", profile.exercise),
                ));
            }
            profile.validate()?;
        }

        for exercise in &self.exercises {
            if *exercise == Exercise::Unknown {
                return Err(ConfigError::invalid("exercises", "unknown is not an exercise"));
            }
            if self.profile(*exercise).is_none() {
                return Err(ConfigError::invalid(
                    "exercises",
                    format!("no profile for {}", exercise),
                ));
            }
        }

        self.generic_rules.iter().try_for_each(FormRule::validate)
    }

    pub fn profile(&self, exercise: Exercise) -> Option<&ExerciseProfile> {
        self.profiles.iter().find(|p| p.exercise == exercise)
    }

    pub fn is_supported(&self, exercise: Exercise) -> bool {
        self.exercises.contains(&exercise)
    }

    pub fn extractor_params(&self, metadata: &RunMetadata) -> ExtractorParams {
        ExtractorParams {
            visibility_threshold: self.visibility_threshold,
            frame_interval: metadata.frame_interval(),
        }
    }
}
