use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::feature_extractor::FeatureSet;
use crate::feature_window::FeatureWindow;
use crate::profile::{ExerciseProfile, Signature};
use crate::types::{Exercise, ExerciseLabel};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    /// Conjuntos de features por ventana de clasificación
    pub window_size: usize,
    /// Frames entre evaluaciones mientras se busca
    pub classify_every: usize,
    /// Frames entre evaluaciones con la etiqueta fijada
    pub reclassify_every: usize,
    /// Evaluaciones seguidas coincidentes para fijar la etiqueta
    pub stable_votes: usize,
    /// Margen sobre el segundo necesario para que un voto cuente
    pub min_confidence: f32,
    /// Por debajo de esta puntuación no coincide nada
    pub min_match_score: f32,
    /// Evaluaciones seguidas y seguras de otro ejercicio que colapsan la etiqueta
    pub collapse_patience: usize,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            window_size: 30,
            classify_every: 5,
            reclassify_every: 15,
            stable_votes: 2,
            min_confidence: 0.6,
            min_match_score: 0.5,
            collapse_patience: 3,
        }
    }
}

/// Puntúa ventanas contra la firma de cada perfil
#[derive(Debug, Clone)]
pub struct ExerciseClassifier {
    signatures: Vec<(Exercise, Signature)>,
    min_match_score: f32,
}

impl ExerciseClassifier {
    pub fn new(profiles: &[ExerciseProfile], min_match_score: f32) -> Self {
        Self {
            signatures: profiles
                .iter()
                .map(|p| (p.exercise, p.signature.clone()))
                .collect(),
            min_match_score,
        }
    }

    /// Puntuación por ejercicio, la mejor primero. Los empates se resuelven por
    /// orden de ejercicio, no por el orden de los perfiles.
    pub fn predict_scores(&self, window: &FeatureWindow) -> Vec<(Exercise, f32)> {
        let mut scores: Vec<(Exercise, f32)> = self
            .signatures
            .iter()
            .map(|(exercise, signature)| (*exercise, signature.score(window)))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scores
    }

    /// Mejor candidato; la confianza es su margen sobre el segundo
    pub fn classify(&self, window: &FeatureWindow) -> ExerciseLabel {
        let scores = self.predict_scores(window);
        let Some(&(best, best_score)) = scores.first() else {
            return ExerciseLabel::unknown();
        };
        if best_score < self.min_match_score {
            return ExerciseLabel::unknown();
        }
        let runner_up = scores.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        ExerciseLabel {
            exercise: best,
            confidence: (best_score - runner_up).clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerStatus {
    Searching,
    Locked(ExerciseLabel),
    /// La etiqueta fijada dejó de coincidir; definitivo para la ejecución
    Collapsed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerEvent {
    Locked(ExerciseLabel),
    Collapsed {
        from: Exercise,
        to: Exercise,
        confidence: f32,
    },
}

/// Convierte un flujo de features en una etiqueta estable.
///
/// La etiqueta se fija tras `stable_votes` evaluaciones seguras y coincidentes.
/// Después se revisa cada cierto tiempo; si otro ejercicio gana con seguridad
/// `collapse_patience` veces seguidas, la etiqueta colapsa en vez de cambiar
/// en silencio.
#[derive(Debug, Clone)]
pub struct ClassificationTracker {
    classifier: ExerciseClassifier,
    params: ClassifierParams,
    window: FeatureWindow,
    since_check: usize,
    status: TrackerStatus,
    streak: Option<(Exercise, usize)>,
    challenger: Option<(Exercise, usize)>,
    best_confidence: f32,
}

impl ClassificationTracker {
    pub fn new(classifier: ExerciseClassifier, params: ClassifierParams) -> Self {
        Self {
            classifier,
            window: FeatureWindow::new(params.window_size),
            params,
            since_check: 0,
            status: TrackerStatus::Searching,
            streak: None,
            challenger: None,
            best_confidence: 0.0,
        }
    }

    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    /// Mayor confianza alcanzada hasta ahora por un ejercicio conocido
    pub fn best_confidence(&self) -> f32 {
        self.best_confidence
    }

    pub fn observe(&mut self, features: &FeatureSet) -> Option<TrackerEvent> {
        if self.status == TrackerStatus::Collapsed {
            return None;
        }

        self.window.push(features.clone());
        self.since_check += 1;

        let interval = match self.status {
            TrackerStatus::Locked(_) => self.params.reclassify_every,
            _ => self.params.classify_every,
        };
        if !self.window.is_ready() || self.since_check < interval.max(1) {
            return None;
        }
        self.since_check = 0;

        let label = self.classifier.classify(&self.window);
        debug!(
            frame = features.frame.index,
            exercise = %label.exercise,
            confidence = label.confidence,
            "clasificación"
        );
        if label.exercise != Exercise::Unknown {
            self.best_confidence = self.best_confidence.max(label.confidence);
        }
        let confident =
            label.exercise != Exercise::Unknown && label.confidence >= self.params.min_confidence;

        match self.status {
            TrackerStatus::Searching => {
                if !confident {
                    self.streak = None;
                    return None;
                }
                let votes = match self.streak {
                    Some((exercise, n)) if exercise == label.exercise => n + 1,
                    _ => 1,
                };
                self.streak = Some((label.exercise, votes));
                if votes >= self.params.stable_votes.max(1) {
                    info!(
                        exercise = %label.exercise,
                        confidence = label.confidence,
                        frame = features.frame.index,
                        "ejercicio identificado"
                    );
                    self.status = TrackerStatus::Locked(label);
                    return Some(TrackerEvent::Locked(label));
                }
                None
            }
            TrackerStatus::Locked(current) => {
                if !confident || label.exercise == current.exercise {
                    self.challenger = None;
                    return None;
                }
                let checks = match self.challenger {
                    Some((exercise, n)) if exercise == label.exercise => n + 1,
                    _ => 1,
                };
                self.challenger = Some((label.exercise, checks));
                if checks >= self.params.collapse_patience.max(1) {
                    warn!(
                        from = %current.exercise,
                        to = %label.exercise,
                        frame = features.frame.index,
                        "el ejercicio cambió a mitad de la ejecución, clasificación colapsada"
                    );
                    self.status = TrackerStatus::Collapsed;
                    return Some(TrackerEvent::Collapsed {
                        from: current.exercise,
                        to: label.exercise,
                        confidence: label.confidence,
                    });
                }
                None
            }
            TrackerStatus::Collapsed => None,
        }
    }

    /// Última oportunidad al final de una ejecución sin etiqueta: una evaluación
    /// sobre lo que tenga la ventana.
    pub fn finalize(&mut self) -> Option<ExerciseLabel> {
        if self.status != TrackerStatus::Searching || self.window.is_empty() {
            return None;
        }
        let label = self.classifier.classify(&self.window);
        if label.exercise != Exercise::Unknown {
            self.best_confidence = self.best_confidence.max(label.confidence);
        }
        if label.exercise != Exercise::Unknown && label.confidence >= self.params.min_confidence {
            info!(exercise = %label.exercise, confidence = label.confidence, "ejercicio identificado al final de la ejecución");
            self.status = TrackerStatus::Locked(label);
            return Some(label);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::FeatureExtractor;
    use crate::profile::builtin_profiles;
    use crate::synthetic;
    use crate::types::LandmarkFrame;

    fn features_of(frames: &[LandmarkFrame]) -> Vec<FeatureSet> {
        let extractor = FeatureExtractor::default();
        frames
            .iter()
            .enumerate()
            .map(|(i, f)| extractor.extract(f, i.checked_sub(1).map(|p| &frames[p])))
            .collect()
    }

    fn window_of(frames: &[LandmarkFrame]) -> FeatureWindow {
        let mut window = FeatureWindow::new(30);
        for fs in features_of(frames).into_iter().take(30) {
            window.push(fs);
        }
        window
    }

    fn classifier() -> ExerciseClassifier {
        ExerciseClassifier::new(&builtin_profiles(), 0.5)
    }

    #[test]
    fn distinguishes_the_four_exercises() {
        let cases = [
            (synthetic::squat_session(2, 80.0), Exercise::Squat),
            (synthetic::curl_session(2), Exercise::BicepCurl),
            (synthetic::pushup_session(2), Exercise::Pushup),
            (synthetic::plank_session(60), Exercise::Plank),
        ];
        for (frames, expected) in cases {
            let label = classifier().classify(&window_of(&frames));
            assert_eq!(label.exercise, expected);
            assert!(label.confidence >= 0.6, "{:?}: {}", expected, label.confidence);
        }
    }

    #[test]
    fn standing_still_is_unknown() {
        let frames: Vec<_> = (0..30)
            .map(|i| synthetic::standing_frame(i, i as f64 / 20.0, 175.0, 175.0))
            .collect();
        assert_eq!(classifier().classify(&window_of(&frames)).exercise, Exercise::Unknown);
    }

    #[test]
    fn occluded_window_is_unknown() {
        let frames: Vec<_> = (0..30).map(|i| LandmarkFrame::occluded(i, i as f64 / 20.0)).collect();
        assert_eq!(classifier().classify(&window_of(&frames)), ExerciseLabel::unknown());
    }

    #[test]
    fn scores_are_sorted_and_bounded() {
        let scores = classifier().predict_scores(&window_of(&synthetic::pushup_session(2)));
        assert_eq!(scores.len(), 4);
        assert!(scores.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(scores.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn tracker_locks_after_stable_votes() {
        let mut tracker = ClassificationTracker::new(classifier(), ClassifierParams::default());
        let mut locked_at = None;
        for fs in features_of(&synthetic::squat_session(3, 80.0)) {
            if let Some(TrackerEvent::Locked(label)) = tracker.observe(&fs) {
                assert_eq!(label.exercise, Exercise::Squat);
                locked_at = Some(fs.frame.index);
            }
        }
        // primera evaluación al llenarse la ventana, la segunda classify_every después
        assert_eq!(locked_at, Some(34));
        assert!(matches!(tracker.status(), TrackerStatus::Locked(l) if l.exercise == Exercise::Squat));
    }

    #[test]
    fn switching_exercise_collapses_the_label() {
        let squats = synthetic::squat_session(3, 80.0);
        let offset = squats.len();
        let mut frames = squats;
        frames.extend(synthetic::curl_session(3).into_iter().map(|mut f| {
            f.index += offset;
            f.timestamp += offset as f64 / 20.0;
            f
        }));

        let mut tracker = ClassificationTracker::new(classifier(), ClassifierParams::default());
        let events: Vec<_> = features_of(&frames)
            .iter()
            .filter_map(|fs| tracker.observe(fs))
            .collect();

        assert!(matches!(events[0], TrackerEvent::Locked(l) if l.exercise == Exercise::Squat));
        assert!(matches!(
            events.last(),
            Some(TrackerEvent::Collapsed { from: Exercise::Squat, to: Exercise::BicepCurl, .. })
        ));
        assert_eq!(tracker.status(), TrackerStatus::Collapsed);
    }

    #[test]
    fn finalize_classifies_a_short_run() {
        let mut tracker = ClassificationTracker::new(classifier(), ClassifierParams::default());
        for fs in features_of(&synthetic::squat_session(1, 80.0)).iter().take(25) {
            assert_eq!(tracker.observe(fs), None);
        }
        let label = tracker.finalize().unwrap();
        assert_eq!(label.exercise, Exercise::Squat);
        assert_eq!(tracker.finalize(), None);
    }
}
