use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::aggregator::KeyFrame;
use crate::feature_extractor::{FeatureSet, FrameRef};
use crate::profile::{FormRule, RuleCheck, RuleTiming};
use crate::rep_counter::RepRecord;

pub const MAX_SCORE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Peso usado al ordenar problemas por importancia
    pub fn rank_weight(self) -> u32 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
        }
    }
}

/// Un problema de técnica observado
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub code: String,
    pub message: String,
    pub recommendation: String,
    pub severity: Severity,
    pub frame_index: usize,
    pub rep: Option<u32>,
}

/// Resultado de revisar un frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameVerdict {
    /// 100 menos los pesos de las reglas que fallan en este frame
    pub score: f32,
    pub failing: Vec<String>,
    /// Problemas registrados por este frame
    pub raised: usize,
}

impl FrameVerdict {
    pub fn is_clean(&self) -> bool {
        self.failing.is_empty()
    }
}

/// Resultado de revisar una repetición completa
#[derive(Debug, Clone, PartialEq)]
pub struct RepVerdict {
    pub failing: Vec<String>,
    /// Puntos que las reglas de repetición restaron a esta repetición
    pub deduction: f32,
}

impl RepVerdict {
    pub fn is_clean(&self) -> bool {
        self.failing.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct RuleState {
    /// Gravedad del episodio de fallo en curso
    episode: Option<Severity>,
    deducted: f32,
}

/// Aplica el bucle genérico de reglas a features y repeticiones completadas.
/// Lleva el registro de problemas, la puntuación y los candidatos a frame clave.
#[derive(Debug, Clone)]
pub struct FormEvaluator {
    rules: Vec<FormRule>,
    states: Vec<RuleState>,
    issues: Vec<Issue>,
    key_frames: KeyFrameSelector,
}

impl FormEvaluator {
    pub fn new(rules: Vec<FormRule>, max_key_frames: usize) -> Self {
        let states = vec![RuleState::default(); rules.len()];
        Self {
            rules,
            states,
            issues: Vec::new(),
            key_frames: KeyFrameSelector::new(max_key_frames),
        }
    }

    pub fn evaluate_frame(&mut self, features: &FeatureSet, in_rep: bool, rep: Option<u32>) -> FrameVerdict {
        let mut frame_deduction = 0.0;
        let mut failing = Vec::new();
        let mut raised = 0;

        for (rule, state) in self.rules.iter().zip(self.states.iter_mut()) {
            let RuleCheck::Feature { feature, .. } = rule.check else {
                continue;
            };
            if rule.timing == RuleTiming::InRep && !in_rep {
                state.episode = None;
                continue;
            }
            // una medida inválida no abre ni cierra episodios
            let Some(value) = features.get(feature) else {
                continue;
            };

            let Some(severity) = rule.grade(value) else {
                state.episode = None;
                continue;
            };
            frame_deduction += rule.deduction(severity);
            failing.push(rule.code.clone());

            let charge = match state.episode {
                None => Some(rule.deduction(severity)),
                Some(prev) if severity > prev => Some(rule.deduction(severity) - rule.deduction(prev)),
                Some(_) => None,
            };
            if let Some(amount) = charge {
                state.episode = Some(severity);
                state.deducted = (state.deducted + amount).min(rule.max_deduction);
                debug!(
                    code = %rule.code,
                    ?severity,
                    value,
                    frame = features.frame.index,
                    "problema de técnica"
                );
                self.issues.push(Issue {
                    code: rule.code.clone(),
                    message: rule.message.clone(),
                    recommendation: rule.recommendation.clone(),
                    severity,
                    frame_index: features.frame.index,
                    rep,
                });
                raised += 1;
            }
        }

        let score = (MAX_SCORE - frame_deduction).clamp(0.0, MAX_SCORE);
        if !failing.is_empty() {
            self.key_frames.observe(&features.frame, score, &failing);
        }
        FrameVerdict { score, failing, raised }
    }

    /// Aplica las reglas de repetición a una repetición completada. `bottom` es
    /// su frame más profundo con la puntuación de ese frame.
    pub fn evaluate_rep(&mut self, record: &RepRecord, bottom: Option<(&FrameRef, f32)>) -> RepVerdict {
        let mut failing = Vec::new();
        let mut deduction = 0.0;

        for (rule, state) in self.rules.iter().zip(self.states.iter_mut()) {
            if !matches!(rule.check, RuleCheck::RepDepth { .. }) {
                continue;
            }
            let Some(severity) = rule.grade(record.depth) else {
                continue;
            };
            let amount = rule.deduction(severity);
            state.deducted = (state.deducted + amount).min(rule.max_deduction);
            deduction += amount;
            debug!(code = %rule.code, ?severity, rep = record.number, depth = record.depth, "fallo en la repetición");
            self.issues.push(Issue {
                code: rule.code.clone(),
                message: rule.message.clone(),
                recommendation: rule.recommendation.clone(),
                severity,
                frame_index: record.bottom_frame,
                rep: Some(record.number),
            });
            failing.push(rule.code.clone());
        }

        if !failing.is_empty() {
            let (frame, score) = match bottom {
                Some((frame, score)) => (frame.clone(), score),
                None => (
                    FrameRef {
                        index: record.bottom_frame,
                        timestamp: record.bottom_timestamp,
                        image_ref: None,
                    },
                    MAX_SCORE,
                ),
            };
            self.key_frames
                .observe(&frame, (score - deduction).clamp(0.0, MAX_SCORE), &failing);
        }
        RepVerdict { failing, deduction }
    }

    /// Registra una observación que no afecta a la puntuación
    pub fn note(&mut self, code: &str, message: &str, recommendation: &str, frame_index: usize) {
        self.issues.push(Issue {
            code: code.to_string(),
            message: message.to_string(),
            recommendation: recommendation.to_string(),
            severity: Severity::Info,
            frame_index,
            rep: None,
        });
    }

    /// Puntuación acumulada: 100 menos los descuentos de cada regla, con su tope
    pub fn score(&self) -> f32 {
        let deducted: f32 = self.states.iter().map(|s| s.deducted).sum();
        (MAX_SCORE - deducted).clamp(0.0, MAX_SCORE)
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn key_frames(&self) -> Vec<KeyFrame> {
        let messages: BTreeMap<&str, &str> = self
            .rules
            .iter()
            .map(|r| (r.code.as_str(), r.message.as_str()))
            .collect();
        self.key_frames.select(&messages)
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    frame: FrameRef,
    score: f32,
}

/// Guarda, por código, el frame de peor puntuación donde apareció el problema
#[derive(Debug, Clone)]
pub struct KeyFrameSelector {
    max_frames: usize,
    worst: BTreeMap<String, Candidate>,
}

impl KeyFrameSelector {
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames,
            worst: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, frame: &FrameRef, score: f32, codes: &[String]) {
        for code in codes {
            let replace = match self.worst.get(code) {
                Some(current) => score < current.score,
                None => true,
            };
            if replace {
                self.worst.insert(
                    code.clone(),
                    Candidate {
                        frame: frame.clone(),
                        score,
                    },
                );
            }
        }
    }

    /// Candidatos agrupados por frame, peor puntuación primero, como mucho `max_frames`
    pub fn select(&self, messages: &BTreeMap<&str, &str>) -> Vec<KeyFrame> {
        let mut by_frame: BTreeMap<usize, (FrameRef, f32, Vec<String>)> = BTreeMap::new();
        for (code, candidate) in &self.worst {
            let message = messages.get(code.as_str()).copied().unwrap_or(code.as_str());
            let entry = by_frame
                .entry(candidate.frame.index)
                .or_insert_with(|| (candidate.frame.clone(), candidate.score, Vec::new()));
            entry.1 = entry.1.min(candidate.score);
            entry.2.push(message.to_string());
        }

        let mut frames: Vec<_> = by_frame.into_values().collect();
        frames.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.index.cmp(&b.0.index)));
        frames
            .into_iter()
            .take(self.max_frames)
            .map(|(frame, score, issues)| KeyFrame {
                frame: frame.index,
                timestamp: frame.timestamp,
                score: score.round() as u32,
                issues,
                image_path: frame.image_ref,
            })
            .collect()
    }
}
