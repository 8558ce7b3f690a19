//! Conocimiento por ejercicio: cómo se reconoce (firma del clasificador), cómo
//! se delimita una repetición y qué reglas de técnica aplican. Todo es dato, así
//! que un ejercicio nuevo se añade desde el fichero de configuración.

use serde::{Deserialize, Serialize};

use crate::angle_filter::AngleFilterConfig;
use crate::error::ConfigError;
use crate::feature_extractor::Feature;
use crate::feature_window::FeatureWindow;
use crate::form_evaluator::Severity;
use crate::types::Exercise;

// ========== Firma ==========

/// Lo que se espera de una feature dentro de la ventana de clasificación
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    /// Las muestras se mantienen dentro de `[min, max]`
    Level { min: f32, max: f32 },
    /// La feature recorre al menos `min_span` grados
    Moving { min_span: f32 },
    /// La feature no recorre más de `max_span`
    Still { max_span: f32 },
}

impl Pattern {
    /// Calidad del ajuste en [0, 1]
    pub fn score(&self, window: &FeatureWindow, feature: Feature) -> f32 {
        match *self {
            Pattern::Level { min, max } => window.fraction_in_range(feature, min, max),
            Pattern::Moving { min_span } => match window.span(feature) {
                Some(span) if min_span > 0.0 => (span / min_span).min(1.0),
                Some(_) => 1.0,
                None => 0.0,
            },
            Pattern::Still { max_span } => match window.span(feature) {
                Some(span) if span <= max_span => 1.0,
                Some(span) => (max_span / span).powi(2),
                None => 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureTerm {
    pub feature: Feature,
    pub pattern: Pattern,
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Los términos de puerta multiplican la puntuación en vez de entrar en la media ponderada
    #[serde(default)]
    pub gate: bool,
}

fn default_weight() -> f32 {
    1.0
}

impl SignatureTerm {
    fn new(feature: Feature, pattern: Pattern, weight: f32) -> Self {
        Self {
            feature,
            pattern,
            weight,
            gate: false,
        }
    }

    fn gate(feature: Feature, pattern: Pattern) -> Self {
        Self {
            feature,
            pattern,
            weight: 1.0,
            gate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    pub terms: Vec<SignatureTerm>,
}

impl Signature {
    pub fn score(&self, window: &FeatureWindow) -> f32 {
        let mut gate = 1.0f32;
        let mut weighted = 0.0f32;
        let mut total_weight = 0.0f32;

        for term in &self.terms {
            let s = term.pattern.score(window, term.feature);
            if term.gate {
                gate *= s;
            } else {
                weighted += term.weight * s;
                total_weight += term.weight;
            }
        }

        let mean = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            1.0
        };
        (gate * mean).clamp(0.0, 1.0)
    }
}

// ========== Repeticiones ==========

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepThresholds {
    /// Ángulo articular que se abre y se cierra en cada repetición
    pub primary: Feature,
    /// Ángulo que cuenta como extensión completa (cierra la repetición)
    pub top_angle: f32,
    /// El punto de giro de una repetición debe quedar en este ángulo o por debajo
    pub bottom_angle: f32,
    /// Caída bajo el máximo acumulado que inicia un descenso
    pub release_delta: f32,
    /// Subida sobre el mínimo acumulado que marca el punto de giro
    pub reversal_delta: f32,
    /// Recorrido mínimo de pico a fondo de una repetición contable
    pub min_excursion: f32,
    /// Permanencia antes de salir de TOP o BOTTOM (segundos)
    pub min_phase_seconds: f32,
    #[serde(default)]
    pub smoothing: AngleFilterConfig,
}

impl RepThresholds {
    pub fn validate(&self, exercise: Exercise) -> Result<(), ConfigError> {
        let field = |name: &str| format!("{}.reps.{}", exercise, name);
        if !self.primary.is_joint_angle() {
            return Err(ConfigError::invalid(field("primary"), "must be a joint angle"));
        }
        if !(0.0..=180.0).contains(&self.top_angle) || !(0.0..=180.0).contains(&self.bottom_angle) {
            return Err(ConfigError::invalid(field("top_angle"), "angles must lie in [0, 180]"));
        }
        if self.bottom_angle >= self.top_angle {
            return Err(ConfigError::invalid(
                field("bottom_angle"),
                format!("{} is not below top_angle {}", self.bottom_angle, self.top_angle),
            ));
        }
        if self.release_delta <= 0.0 || self.reversal_delta <= 0.0 {
            return Err(ConfigError::invalid(field("release_delta"), "deltas must be positive"));
        }
        if self.min_excursion < 0.0 || self.min_phase_seconds < 0.0 {
            return Err(ConfigError::invalid(field("min_excursion"), "must not be negative"));
        }
        Ok(())
    }
}

// ========== Reglas de técnica ==========

/// Lado del umbral que cuenta como fallo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Upper,
    Lower,
}

impl Bound {
    pub fn exceeds(self, value: f32, threshold: f32) -> bool {
        match self {
            Bound::Upper => value > threshold,
            Bound::Lower => value < threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Se comprueba en cada frame
    Feature {
        feature: Feature,
        bound: Bound,
        warn: f32,
        fail: f32,
    },
    /// Se comprueba una vez por repetición completada, contra su profundidad
    RepDepth { bound: Bound, warn: f32, fail: f32 },
}

impl RuleCheck {
    fn limits(&self) -> (Bound, f32, f32) {
        match *self {
            RuleCheck::Feature { bound, warn, fail, .. } | RuleCheck::RepDepth { bound, warn, fail } => {
                (bound, warn, fail)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTiming {
    #[default]
    Always,
    /// Solo entre el inicio y el final de una repetición
    InRep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRule {
    pub code: String,
    pub check: RuleCheck,
    /// Descuento por un error; un aviso cuesta la mitad
    pub weight: f32,
    /// Máximo que esta regla puede restar a la puntuación
    pub max_deduction: f32,
    pub message: String,
    pub recommendation: String,
    #[serde(default)]
    pub timing: RuleTiming,
}

impl FormRule {
    /// Gravedad de `value` según esta regla, `None` si está dentro de límites
    pub fn grade(&self, value: f32) -> Option<Severity> {
        let (bound, warn, fail) = self.check.limits();
        if bound.exceeds(value, fail) {
            Some(Severity::Error)
        } else if bound.exceeds(value, warn) {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    pub fn deduction(&self, severity: Severity) -> f32 {
        match severity {
            Severity::Info => 0.0,
            Severity::Warning => self.weight / 2.0,
            Severity::Error => self.weight,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let field = format!("rules.{}", self.code);
        if self.code.trim().is_empty() {
            return Err(ConfigError::invalid("rules.code", "must not be empty"));
        }
        if self.weight < 0.0 || self.max_deduction < 0.0 {
            return Err(ConfigError::invalid(field, "weights must not be negative"));
        }
        let (bound, warn, fail) = self.check.limits();
        // el umbral de fallo debe quedar en o más allá del de aviso
        if bound.exceeds(warn, fail) {
            return Err(ConfigError::invalid(
                field,
                format!("fail threshold {} is not beyond warn threshold {}", fail, warn),
            ));
        }
        Ok(())
    }

    fn frame(
        code: &str,
        feature: Feature,
        bound: Bound,
        (warn, fail): (f32, f32),
        (weight, max_deduction): (f32, f32),
        message: &str,
        recommendation: &str,
    ) -> Self {
        Self {
            code: code.to_string(),
            check: RuleCheck::Feature {
                feature,
                bound,
                warn,
                fail,
            },
            weight,
            max_deduction,
            message: message.to_string(),
            recommendation: recommendation.to_string(),
            timing: RuleTiming::Always,
        }
    }

    fn depth(
        code: &str,
        bound: Bound,
        (warn, fail): (f32, f32),
        (weight, max_deduction): (f32, f32),
        message: &str,
        recommendation: &str,
    ) -> Self {
        Self {
            code: code.to_string(),
            check: RuleCheck::RepDepth { bound, warn, fail },
            weight,
            max_deduction,
            message: message.to_string(),
            recommendation: recommendation.to_string(),
            timing: RuleTiming::Always,
        }
    }

    fn in_rep(mut self) -> Self {
        self.timing = RuleTiming::InRep;
        self
    }
}

// ========== Perfiles ==========

/// Datos de catálogo que ve el usuario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseInfo {
    pub display_name: String,
    pub description: String,
    pub muscle_groups: Vec<String>,
    pub difficulty: String,
}

impl ExerciseInfo {
    fn new(display_name: &str, description: &str, muscle_groups: &[&str], difficulty: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            description: description.to_string(),
            muscle_groups: muscle_groups.iter().map(|m| m.to_string()).collect(),
            difficulty: difficulty.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseProfile {
    pub exercise: Exercise,
    pub info: ExerciseInfo,
    pub signature: Signature,
    /// `None` en posiciones estáticas
    pub reps: Option<RepThresholds>,
    pub rules: Vec<FormRule>,
}

impl ExerciseProfile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exercise == Exercise::Unknown {
            return Err(ConfigError::invalid("profiles.exercise", "unknown has no profile"));
        }
        if self.signature.terms.is_empty() {
            return Err(ConfigError::invalid(
                format!("{}.signature", self.exercise),
                "needs at least one term",
            ));
        }
        if let Some(reps) = &self.reps {
            reps.validate(self.exercise)?;
        }
        let has_rep_rules = self
            .rules
            .iter()
            .any(|r| matches!(r.check, RuleCheck::RepDepth { .. }));
        if has_rep_rules && self.reps.is_none() {
            return Err(ConfigError::invalid(
                format!("{}.rules", self.exercise),
                "rep_depth rules need rep thresholds",
            ));
        }
        self.rules.iter().try_for_each(FormRule::validate)
    }
}

/// Reglas aplicadas a toda ejecución, sea cual sea el ejercicio
pub fn generic_rules() -> Vec<FormRule> {
    vec![FormRule::frame(
        "visibility",
        Feature::Visibility,
        Bound::Lower,
        (0.7, 0.5),
        (5.0, 10.0),
        "Poor camera angle or lighting",
        "Improve camera position and lighting so your whole body is visible",
    )]
}

pub fn builtin_profiles() -> Vec<ExerciseProfile> {
    vec![squat(), pushup(), bicep_curl(), plank()]
}

fn squat() -> ExerciseProfile {
    ExerciseProfile {
        exercise: Exercise::Squat,
        info: ExerciseInfo::new(
            "Squat",
            "Lower body exercise targeting quadriceps, hamstrings, and glutes",
            &["quadriceps", "hamstrings", "glutes", "core"],
            "beginner",
        ),
        signature: Signature {
            terms: vec![
                SignatureTerm::gate(Feature::TorsoLean, Pattern::Level { min: 0.0, max: 50.0 }),
                SignatureTerm::new(Feature::KneeAngle, Pattern::Moving { min_span: 12.0 }, 2.0),
                SignatureTerm::new(Feature::HipAngle, Pattern::Moving { min_span: 6.0 }, 1.0),
            ],
        },
        reps: Some(RepThresholds {
            primary: Feature::KneeAngle,
            top_angle: 160.0,
            bottom_angle: 155.0,
            release_delta: 8.0,
            reversal_delta: 5.0,
            min_excursion: 15.0,
            min_phase_seconds: 0.1,
            smoothing: AngleFilterConfig::default(),
        }),
        rules: vec![
            FormRule::depth(
                "squat_depth",
                Bound::Upper,
                (100.0, 130.0),
                (15.0, 30.0),
                "Not squatting deep enough",
                "Go deeper until thighs are parallel to the ground",
            ),
            FormRule::depth(
                "squat_too_deep",
                Bound::Lower,
                (60.0, 45.0),
                (10.0, 20.0),
                "Squatting too deep",
                "Stop when thighs reach parallel to protect your knees",
            ),
            FormRule::frame(
                "torso_lean",
                Feature::TorsoLean,
                Bound::Upper,
                (35.0, 50.0),
                (15.0, 30.0),
                "Leaning forward too much",
                "Keep chest up and core engaged",
            ),
            FormRule::frame(
                "knee_cave",
                Feature::KneeWidthRatio,
                Bound::Lower,
                (0.8, 0.65),
                (15.0, 30.0),
                "Knees caving inward",
                "Push your knees out in line with your toes",
            )
            .in_rep(),
            FormRule::frame(
                "knee_symmetry",
                Feature::KneeSymmetry,
                Bound::Upper,
                (15.0, 25.0),
                (10.0, 20.0),
                "Uneven knee bend between left and right",
                "Distribute your weight evenly on both legs",
            ),
            FormRule::frame(
                "stance_narrow",
                Feature::StanceWidth,
                Bound::Lower,
                (0.7, 0.5),
                (10.0, 20.0),
                "Stance too narrow",
                "Place your feet about shoulder-width apart",
            ),
            FormRule::frame(
                "squat_tempo",
                Feature::KneeAngularSpeed,
                Bound::Upper,
                (180.0, 270.0),
                (10.0, 20.0),
                "Moving too fast",
                "Slow down and control the movement through the full range",
            ),
        ],
    }
}

fn pushup() -> ExerciseProfile {
    ExerciseProfile {
        exercise: Exercise::Pushup,
        info: ExerciseInfo::new(
            "Push-up",
            "Upper body exercise targeting chest, shoulders, and triceps",
            &["chest", "shoulders", "triceps", "core"],
            "beginner",
        ),
        signature: Signature {
            terms: vec![
                SignatureTerm::gate(Feature::TorsoLean, Pattern::Level { min: 55.0, max: 125.0 }),
                SignatureTerm::new(Feature::ElbowAngle, Pattern::Moving { min_span: 30.0 }, 2.0),
                SignatureTerm::new(Feature::BodyLineAngle, Pattern::Level { min: 140.0, max: 180.0 }, 1.0),
            ],
        },
        reps: Some(RepThresholds {
            primary: Feature::ElbowAngle,
            top_angle: 150.0,
            bottom_angle: 130.0,
            release_delta: 8.0,
            reversal_delta: 5.0,
            min_excursion: 15.0,
            min_phase_seconds: 0.1,
            smoothing: AngleFilterConfig::default(),
        }),
        rules: vec![
            FormRule::depth(
                "pushup_depth",
                Bound::Upper,
                (100.0, 130.0),
                (15.0, 30.0),
                "Not going low enough",
                "Lower your chest until your elbows reach 90 degrees",
            ),
            FormRule::frame(
                "body_line",
                Feature::BodyLineAngle,
                Bound::Lower,
                (165.0, 150.0),
                (20.0, 40.0),
                "Body not straight",
                "Keep your body in a straight line from head to heels",
            ),
            FormRule::frame(
                "elbow_symmetry",
                Feature::ElbowSymmetry,
                Bound::Upper,
                (15.0, 25.0),
                (10.0, 20.0),
                "Uneven arm bend between left and right",
                "Push evenly through both hands",
            ),
            FormRule::frame(
                "pushup_tempo",
                Feature::ElbowAngularSpeed,
                Bound::Upper,
                (200.0, 300.0),
                (10.0, 20.0),
                "Moving too fast",
                "Lower yourself under control",
            ),
        ],
    }
}

fn bicep_curl() -> ExerciseProfile {
    ExerciseProfile {
        exercise: Exercise::BicepCurl,
        info: ExerciseInfo::new(
            "Bicep Curl",
            "Arm exercise targeting the biceps",
            &["biceps", "forearms"],
            "beginner",
        ),
        signature: Signature {
            terms: vec![
                SignatureTerm::gate(Feature::TorsoLean, Pattern::Level { min: 0.0, max: 35.0 }),
                SignatureTerm::gate(Feature::ElbowAngle, Pattern::Moving { min_span: 50.0 }),
                SignatureTerm::new(Feature::KneeAngle, Pattern::Still { max_span: 15.0 }, 1.0),
            ],
        },
        reps: Some(RepThresholds {
            primary: Feature::ElbowAngle,
            top_angle: 140.0,
            bottom_angle: 110.0,
            release_delta: 8.0,
            reversal_delta: 5.0,
            min_excursion: 20.0,
            min_phase_seconds: 0.1,
            smoothing: AngleFilterConfig::default(),
        }),
        rules: vec![
            FormRule::depth(
                "curl_range_of_motion",
                Bound::Upper,
                (70.0, 90.0),
                (15.0, 30.0),
                "Not curling all the way up",
                "Bring the weight up until your forearm nearly touches your biceps",
            ),
            FormRule::frame(
                "curl_overextension",
                Feature::ElbowAngle,
                Bound::Upper,
                (172.0, 178.0),
                (10.0, 20.0),
                "Arm fully extended",
                "Keep slight tension at the bottom of the movement",
            ),
            FormRule::frame(
                "curl_momentum",
                Feature::ElbowAngularSpeed,
                Bound::Upper,
                (240.0, 360.0),
                (20.0, 40.0),
                "Using momentum",
                "Slow down the movement and control the weight",
            ),
            FormRule::frame(
                "torso_swing",
                Feature::TorsoLean,
                Bound::Upper,
                (15.0, 25.0),
                (15.0, 30.0),
                "Swinging the torso",
                "Keep your back straight and still",
            ),
            FormRule::frame(
                "elbow_drift",
                Feature::UpperArmAngle,
                Bound::Upper,
                (30.0, 45.0),
                (10.0, 20.0),
                "Elbows drifting away from the body",
                "Keep your elbows pinned to your sides",
            ),
        ],
    }
}

fn plank() -> ExerciseProfile {
    ExerciseProfile {
        exercise: Exercise::Plank,
        info: ExerciseInfo::new(
            "Plank",
            "Core strengthening exercise",
            &["core", "shoulders", "glutes"],
            "beginner",
        ),
        signature: Signature {
            terms: vec![
                SignatureTerm::gate(Feature::TorsoLean, Pattern::Level { min: 55.0, max: 125.0 }),
                SignatureTerm::new(Feature::ElbowAngle, Pattern::Still { max_span: 12.0 }, 3.0),
                SignatureTerm::new(Feature::BodyLineAngle, Pattern::Level { min: 150.0, max: 180.0 }, 1.0),
            ],
        },
        reps: None,
        rules: vec![
            FormRule::frame(
                "body_line",
                Feature::BodyLineAngle,
                Bound::Lower,
                (165.0, 150.0),
                (25.0, 50.0),
                "Hips sagging or piking",
                "Keep your body in a straight line from head to heels",
            ),
            FormRule::frame(
                "hip_symmetry",
                Feature::HipSymmetry,
                Bound::Upper,
                (10.0, 20.0),
                (10.0, 20.0),
                "Hips rotating to one side",
                "Keep your hips level and square to the floor",
            ),
        ],
    }
}
