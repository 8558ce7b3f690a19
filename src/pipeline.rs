use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, AnalysisResult, RepSummary, RunSummary};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, InsufficientData};
use crate::exercise_classifier::{ClassificationTracker, ExerciseClassifier, TrackerEvent};
use crate::feature_extractor::{FeatureExtractor, FeatureSet, FrameRef};
use crate::form_evaluator::{FormEvaluator, MAX_SCORE};
use crate::rep_counter::{Phase, RepCounter, RepState};
use crate::types::{Exercise, ExerciseLabel, Landmark, LandmarkFrame, RunMetadata};

const EXERCISE_CHANGED: &str = "exercise_changed";

/// Punto de entrada: guarda la configuración validada y lanza ejecuciones independientes
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: Arc<AnalysisConfig>,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn start(&self, metadata: RunMetadata) -> AnalysisRun {
        AnalysisRun::new(Arc::clone(&self.config), metadata)
    }

    /// Pasa una grabación completa por una ejecución nueva
    pub fn analyze<I>(&self, frames: I, metadata: RunMetadata) -> Result<AnalysisResult, AnalysisError>
    where
        I: IntoIterator<Item = LandmarkFrame>,
    {
        let mut run = self.start(metadata);
        for frame in frames {
            run.push(frame);
        }
        run.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Ejercicio aún desconocido; las features esperan en la cola pendiente
    Searching,
    Assessing,
    /// La etiqueta colapsó; ya no se cuenta ni se evalúa nada
    Collapsed,
}

/// Estado de un análisis. Es dueño de todo lo que modifica, así que cada
/// ejecución puede vivir en su propio hilo.
#[derive(Debug)]
pub struct AnalysisRun {
    config: Arc<AnalysisConfig>,
    metadata: RunMetadata,
    extractor: FeatureExtractor,
    tracker: ClassificationTracker,
    stage: Stage,
    label: ExerciseLabel,
    previous: Option<LandmarkFrame>,
    pending: VecDeque<FeatureSet>,
    evaluator: FormEvaluator,
    counter: Option<RepCounter>,
    /// Frame más profundo de la repetición en curso y su puntuación
    bottom: Option<(FrameRef, f32)>,
    /// Peor puntuación de frame de la repetición en curso
    rep_floor: Option<f32>,
    reps: Vec<RepSummary>,
    first_timestamp: Option<f64>,
    last_timestamp: Option<f64>,
    frames_analyzed: usize,
    valid_frames: usize,
    frames_rejected: usize,
}

impl AnalysisRun {
    fn new(config: Arc<AnalysisConfig>, metadata: RunMetadata) -> Self {
        let classifier = ExerciseClassifier::new(&config.profiles, config.classifier.min_match_score);
        Self {
            extractor: FeatureExtractor::new(config.extractor_params(&metadata)),
            tracker: ClassificationTracker::new(classifier, config.classifier),
            stage: Stage::Searching,
            label: ExerciseLabel::unknown(),
            previous: None,
            pending: VecDeque::new(),
            evaluator: FormEvaluator::new(config.generic_rules.clone(), config.max_key_frames),
            counter: None,
            bottom: None,
            rep_floor: None,
            reps: Vec::new(),
            first_timestamp: None,
            last_timestamp: None,
            frames_analyzed: 0,
            valid_frames: 0,
            frames_rejected: 0,
            metadata,
            config,
        }
    }

    pub fn label(&self) -> ExerciseLabel {
        self.label
    }

    pub fn rep_state(&self) -> Option<RepState> {
        self.counter.as_ref().map(RepCounter::state)
    }

    pub fn frames_analyzed(&self) -> usize {
        self.frames_analyzed
    }

    /// Procesa un frame. Devuelve false si se descartó por tener un timestamp
    /// hacia atrás.
    pub fn push(&mut self, frame: LandmarkFrame) -> bool {
        let out_of_order = !frame.timestamp.is_finite()
            || self.last_timestamp.is_some_and(|last| frame.timestamp < last);
        if out_of_order {
            warn!(
                frame = frame.index,
                timestamp = frame.timestamp,
                last = ?self.last_timestamp,
                "frame fuera de orden, descartado"
            );
            self.frames_rejected += 1;
            return false;
        }

        self.frames_analyzed += 1;
        self.first_timestamp.get_or_insert(frame.timestamp);
        self.last_timestamp = Some(frame.timestamp);

        let features = self.extractor.extract(&frame, self.previous.as_ref());
        self.previous = Some(frame);
        if features.is_usable() {
            self.valid_frames += 1;
        }

        match self.stage {
            Stage::Searching => {
                let event = self.tracker.observe(&features);
                self.pending.push_back(features);
                if self.pending.len() > self.config.max_pending_frames {
                    if let Some(dropped) = self.pending.pop_front() {
                        debug!(frame = dropped.frame.index, "cola pendiente llena, se descarta el frame más antiguo");
                    }
                }
                if let Some(TrackerEvent::Locked(label)) = event {
                    self.lock(label);
                }
            }
            Stage::Assessing => match self.tracker.observe(&features) {
                Some(TrackerEvent::Collapsed { from, to, .. }) => {
                    self.collapse(from, to, features.frame.index);
                }
                _ => self.assess(&features),
            },
            Stage::Collapsed => {}
        }
        true
    }

    /// Procesa landmarks en bruto, ordenados como `Joint::ALL`. Una entrada mal
    /// formada pasa a ser un frame ocluido y la línea temporal no se rompe.
    pub fn push_points(&mut self, index: usize, timestamp: f64, points: &[Landmark]) -> bool {
        let frame = match LandmarkFrame::from_points(index, timestamp, points) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "frame mal formado, se sustituye por uno ocluido");
                LandmarkFrame::occluded(index, timestamp)
            }
        };
        self.push(frame)
    }

    pub fn finish(mut self) -> Result<AnalysisResult, AnalysisError> {
        let required = self.config.min_valid_frames;
        if self.valid_frames < required {
            return Err(AnalysisError::InsufficientData(InsufficientData::TooFewValidFrames {
                valid: self.valid_frames,
                required,
            }));
        }

        if self.stage == Stage::Searching {
            match self.tracker.finalize() {
                Some(label) => self.lock(label),
                None => {
                    return Err(AnalysisError::InsufficientData(
                        InsufficientData::ClassifierNeverStabilized {
                            best_confidence: self.tracker.best_confidence(),
                        },
                    ))
                }
            }
        }

        let result = aggregate(RunSummary {
            label: self.label,
            score: self.evaluator.score(),
            reps: self.reps,
            key_frames: self.evaluator.key_frames(),
            issues: self.evaluator.into_issues(),
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
            frames_analyzed: self.frames_analyzed,
            valid_frames: self.valid_frames,
            frames_rejected: self.frames_rejected,
            metadata: self.metadata,
            session: self.config.session,
        });
        info!(
            exercise = %result.exercise_detected,
            reps = result.rep_count,
            score = result.overall_score,
            frames = result.frames_analyzed,
            "análisis completado"
        );
        Ok(result)
    }

    fn lock(&mut self, label: ExerciseLabel) {
        let profile = self
            .config
            .profile(label.exercise)
            .filter(|_| self.config.is_supported(label.exercise));

        match profile {
            Some(profile) => {
                let mut rules = profile.rules.clone();
                rules.extend(self.config.generic_rules.iter().cloned());
                self.evaluator = FormEvaluator::new(rules, self.config.max_key_frames);
                self.counter = profile
                    .reps
                    .map(|t| RepCounter::new(t, self.metadata.effective_fps()));
                self.label = label;
            }
            None => {
                let err = AnalysisError::UnsupportedExercise(label.exercise);
                warn!(error = %err, "se continúa solo con las reglas genéricas");
                self.label = ExerciseLabel::unknown();
            }
        }

        self.stage = Stage::Assessing;
        let pending = std::mem::take(&mut self.pending);
        debug!(frames = pending.len(), "reprocesando frames pendientes");
        for features in &pending {
            self.assess(features);
        }
    }

    fn collapse(&mut self, from: Exercise, to: Exercise, frame_index: usize) {
        self.evaluator.note(
            EXERCISE_CHANGED,
            &format!("Exercise changed from {} to {} during the recording", from, to),
            "Record one exercise per session",
            frame_index,
        );
        self.label = ExerciseLabel::unknown();
        self.counter = None;
        self.bottom = None;
        self.rep_floor = None;
        self.stage = Stage::Collapsed;
    }

    /// Pasa un conjunto de features por el contador y el evaluador de técnica
    fn assess(&mut self, features: &FeatureSet) {
        let step = self.counter.as_mut().map(|counter| {
            let angle = features.get(counter.thresholds().primary);
            counter.update(features.frame.index, features.frame.timestamp, angle)
        });

        let (in_rep, rep_number) = match (&step, &self.counter) {
            (Some(step), _) if step.completed.is_some() => (true, step.completed.map(|r| r.number)),
            (Some(step), Some(counter)) if step.phase != Phase::Top => (true, Some(counter.count() + 1)),
            _ => (false, None),
        };

        let verdict = self.evaluator.evaluate_frame(features, in_rep, rep_number);
        self.rep_floor = if in_rep {
            Some(self.rep_floor.map_or(verdict.score, |floor| floor.min(verdict.score)))
        } else {
            None
        };

        if let Some(counter) = self.counter.as_mut() {
            if !verdict.is_clean() && counter.in_rep() {
                counter.mark_violation();
            }
        }

        let Some(step) = step else {
            return;
        };
        if step.new_extremum {
            self.bottom = Some((features.frame.clone(), verdict.score));
        }
        if let Some(record) = step.completed {
            let bottom = self.bottom.take();
            let rep_verdict = self
                .evaluator
                .evaluate_rep(&record, bottom.as_ref().map(|(frame, score)| (frame, *score)));
            let floor = self.rep_floor.take().unwrap_or(MAX_SCORE);
            self.reps.push(RepSummary::new(
                &record,
                !rep_verdict.is_clean(),
                floor - rep_verdict.deduction,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::PerformanceLevel;
    use crate::form_evaluator::Severity;
    use crate::session::{FormTrend, Pace};
    use crate::synthetic;
    use crate::types::{Joint, NUM_JOINTS};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalysisConfig::default()).unwrap()
    }

    fn meta() -> RunMetadata {
        RunMetadata::new(20.0)
    }

    #[test]
    fn clean_squats() {
        let result = analyzer().analyze(synthetic::squat_session(5, 80.0), meta()).unwrap();
        assert_eq!(result.exercise_detected, Exercise::Squat);
        assert!(result.confidence >= 0.6);
        assert_eq!(result.rep_count, 5);
        assert_eq!(result.overall_score, 100);
        assert_eq!(result.performance_level, PerformanceLevel::Excellent);
        assert!(result.issues_detected.is_empty());
        assert!(result.key_frames.is_empty());
        assert_eq!(result.frames_analyzed, 221);
        assert!(result.reps.iter().all(|r| !r.form_violated));
    }

    #[test]
    fn shallow_squats_are_counted_and_flagged() {
        let clean = analyzer().analyze(synthetic::squat_session(5, 80.0), meta()).unwrap();
        let shallow = analyzer().analyze(synthetic::squat_session(5, 120.0), meta()).unwrap();

        assert_eq!(shallow.exercise_detected, Exercise::Squat);
        assert_eq!(shallow.rep_count, 5);
        assert_eq!(shallow.issues_detected, vec!["Not squatting deep enough".to_string()]);
        assert_eq!(
            shallow.recommendations,
            vec!["Go deeper until thighs are parallel to the ground".to_string()]
        );
        assert_eq!(shallow.overall_score, 70);
        assert!(shallow.overall_score < clean.overall_score);
        assert!(shallow.reps.iter().all(|r| r.form_violated));
        assert_eq!(shallow.key_frames.len(), 1);
        assert_eq!(shallow.issue_log.len(), 5);
        assert!(shallow.issue_log.iter().all(|i| i.rep.is_some()));
    }

    #[test]
    fn barely_bent_squats_are_counted_and_flagged() {
        let result = analyzer().analyze(synthetic::squat_session(5, 150.0), meta()).unwrap();
        assert_eq!(result.exercise_detected, Exercise::Squat);
        assert_eq!(result.rep_count, 5);
        let depth_issues: Vec<_> = result
            .issue_log
            .iter()
            .filter(|i| i.code == "squat_depth")
            .collect();
        assert_eq!(depth_issues.len(), 5);
        assert!(depth_issues.iter().all(|i| i.severity == Severity::Error));
        assert_eq!(result.overall_score, 70);
        assert!(result.reps.iter().all(|r| r.form_violated && r.depth > 130.0));
        assert!(result.reps.iter().all(|r| r.score == 85));
        assert_eq!(result.key_frames.len(), 1);
        assert!(result.key_frames[0].timestamp > 0.0);
    }

    #[test]
    fn session_summary_follows_the_reps() {
        let clean = analyzer().analyze(synthetic::squat_session(5, 80.0), meta()).unwrap();
        // 5 repeticiones en 11 s
        assert_eq!(clean.session.pace, Pace::SlowDown);
        assert_eq!(clean.session.form_trend, FormTrend::Stable);
        assert_eq!(clean.session.average_rep_score, Some(100.0));
        assert!(!clean.session.fatigue_detected);
        assert!(!clean.session.rest_recommended);
        assert!(clean.reps.iter().all(|r| r.score == 100));

        let shallow = analyzer().analyze(synthetic::squat_session(5, 120.0), meta()).unwrap();
        assert!(shallow.reps.iter().all(|r| r.score == 93));
        assert_eq!(shallow.session.average_rep_score, Some(93.0));
        assert_eq!(shallow.session.form_trend, FormTrend::Stable);
    }

    #[test]
    fn other_exercises_end_to_end() {
        let pushups = analyzer().analyze(synthetic::pushup_session(3), meta()).unwrap();
        assert_eq!(pushups.exercise_detected, Exercise::Pushup);
        assert_eq!(pushups.rep_count, 3);
        assert_eq!(pushups.overall_score, 100);

        let curls = analyzer().analyze(synthetic::curl_session(3), meta()).unwrap();
        assert_eq!(curls.exercise_detected, Exercise::BicepCurl);
        assert_eq!(curls.rep_count, 3);
        assert_eq!(curls.overall_score, 100);

        let plank = analyzer().analyze(synthetic::plank_session(90), meta()).unwrap();
        assert_eq!(plank.exercise_detected, Exercise::Plank);
        assert_eq!(plank.rep_count, 0);
        assert_eq!(plank.overall_score, 100);
    }

    #[test]
    fn too_few_frames_is_insufficient_data() {
        let frames = synthetic::squat_session(1, 80.0).into_iter().take(5);
        let err = analyzer().analyze(frames, meta()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientData(InsufficientData::TooFewValidFrames { valid: 5, required: 30 })
        ));
    }

    #[test]
    fn fully_occluded_recording_is_insufficient_data() {
        let frames = (0..60).map(|i| LandmarkFrame::occluded(i, i as f64 / 20.0));
        let err = analyzer().analyze(frames, meta()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientData(InsufficientData::TooFewValidFrames { valid: 0, .. })
        ));
    }

    #[test]
    fn standing_still_never_stabilises() {
        let frames = (0..60).map(|i| synthetic::standing_frame(i, i as f64 / 20.0, 175.0, 175.0));
        let err = analyzer().analyze(frames, meta()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientData(InsufficientData::ClassifierNeverStabilized { .. })
        ));
    }

    #[test]
    fn unsupported_exercise_falls_back_to_generic_rules() {
        let config = AnalysisConfig {
            exercises: vec![Exercise::Pushup],
            ..AnalysisConfig::default()
        };
        let result = Analyzer::new(config)
            .unwrap()
            .analyze(synthetic::squat_session(3, 80.0), meta())
            .unwrap();
        assert_eq!(result.exercise_detected, Exercise::Unknown);
        assert_eq!(result.rep_count, 0);
        assert_eq!(result.overall_score, 100);
    }

    #[test]
    fn changing_exercise_collapses_to_unknown() {
        let squats = synthetic::squat_session(3, 80.0);
        let offset = squats.len();
        let mut frames = squats;
        frames.extend(synthetic::curl_session(3).into_iter().map(|mut f| {
            f.index += offset;
            f.timestamp += offset as f64 / 20.0;
            f
        }));

        let result = analyzer().analyze(frames, meta()).unwrap();
        assert_eq!(result.exercise_detected, Exercise::Unknown);
        // las sentadillas previas al cambio siguen contadas
        assert_eq!(result.rep_count, 3);
        let changed: Vec<_> = result
            .issue_log
            .iter()
            .filter(|i| i.code == EXERCISE_CHANGED)
            .collect();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].frame_index > offset);
        assert_eq!(result.overall_score, 100);
    }

    #[test]
    fn backwards_timestamps_are_rejected() {
        let mut run = analyzer().start(meta());
        let frames = synthetic::squat_session(2, 80.0);
        for (i, frame) in frames.into_iter().enumerate() {
            assert!(run.push(frame));
            if i == 50 {
                assert!(!run.push(synthetic::standing_frame(999, 0.5, 170.0, 180.0)));
            }
        }
        let result = run.finish().unwrap();
        assert_eq!(result.frames_rejected, 1);
        assert_eq!(result.rep_count, 2);
    }

    #[test]
    fn malformed_points_become_occluded_frames() {
        let mut run = analyzer().start(meta());
        for frame in synthetic::squat_session(2, 80.0) {
            run.push(frame);
        }
        let before = run.frames_analyzed();
        let short = vec![Landmark::new(0.5, 0.5, 1.0); NUM_JOINTS - 2];
        assert!(run.push_points(500, 100.0, &short));
        assert_eq!(run.frames_analyzed(), before + 1);

        let mut nan = vec![Landmark::new(0.5, 0.5, 1.0); NUM_JOINTS];
        nan[Joint::LeftHip.index()].y = f32::NAN;
        run.push_points(501, 100.05, &nan);

        let result = run.finish().unwrap();
        assert_eq!(result.frames_analyzed, before + 2);
        assert_eq!(result.valid_frames, before);
    }

    #[test]
    fn malformed_frame_does_not_cost_points() {
        let mut run = analyzer().start(meta());
        for frame in synthetic::squat_session(5, 80.0) {
            run.push(frame);
        }
        let short = vec![Landmark::new(0.5, 0.5, 1.0); NUM_JOINTS - 1];
        assert!(run.push_points(900, 100.0, &short));

        let result = run.finish().unwrap();
        assert_eq!(result.rep_count, 5);
        assert_eq!(result.overall_score, 100);
        assert!(result.key_frames.is_empty());
        assert!(result.issue_log.is_empty());
    }

    #[test]
    fn identical_input_gives_identical_result() {
        let frames = synthetic::squat_session(4, 110.0);
        let first = analyzer().analyze(frames.clone(), meta()).unwrap();
        let second = analyzer().analyze(frames, meta()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn landmark_jitter_keeps_the_count() {
        let mut rng = StdRng::seed_from_u64(42);
        let frames: Vec<LandmarkFrame> = synthetic::squat_session(5, 80.0)
            .into_iter()
            .map(|mut frame| {
                for lm in frame.landmarks.iter_mut() {
                    lm.x += rng.gen_range(-0.002..0.002);
                    lm.y += rng.gen_range(-0.002..0.002);
                }
                frame
            })
            .collect();
        let result = analyzer().analyze(frames, meta()).unwrap();
        assert_eq!(result.exercise_detected, Exercise::Squat);
        assert_eq!(result.rep_count, 5);
    }

    #[test]
    fn runs_are_independent_across_threads() {
        let analyzer = analyzer();
        let handles: Vec<_> = [80.0f32, 120.0]
            .into_iter()
            .map(|bottom| {
                let analyzer = analyzer.clone();
                std::thread::spawn(move || analyzer.analyze(synthetic::squat_session(5, bottom), meta()))
            })
            .collect();
        let scores: Vec<u32> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap().overall_score)
            .collect();
        assert_eq!(scores, vec![100, 70]);
    }
}
