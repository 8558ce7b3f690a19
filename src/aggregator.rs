use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::form_evaluator::Issue;
use crate::rep_counter::RepRecord;
use crate::session::{SessionParams, SessionSummary};
use crate::types::{Exercise, ExerciseLabel, RunMetadata, DEFAULT_FPS};

/// Frame que merece enseñarse al usuario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFrame {
    pub frame: usize,
    pub timestamp: f64,
    pub score: u32,
    pub issues: Vec<String>,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    NeedsWork,
    Poor,
}

impl PerformanceLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => PerformanceLevel::Excellent,
            60..=79 => PerformanceLevel::Good,
            40..=59 => PerformanceLevel::NeedsWork,
            _ => PerformanceLevel::Poor,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PerformanceLevel::Excellent => "EXCELLENT",
            PerformanceLevel::Good => "GOOD",
            PerformanceLevel::NeedsWork => "NEEDS WORK",
            PerformanceLevel::Poor => "POOR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepSummary {
    pub number: u32,
    pub start_frame: usize,
    pub end_frame: usize,
    pub depth: f32,
    pub duration_seconds: f64,
    pub form_violated: bool,
    /// Peor puntuación de frame durante la repetición menos lo restado por sus reglas
    pub score: u32,
}

impl RepSummary {
    pub fn new(record: &RepRecord, flagged: bool, score: f32) -> Self {
        Self {
            number: record.number,
            start_frame: record.start_frame,
            end_frame: record.end_frame,
            depth: record.depth,
            duration_seconds: record.duration_seconds,
            form_violated: record.form_violated || flagged,
            score: score.clamp(0.0, 100.0).round() as u32,
        }
    }
}

/// Evaluación final e inmutable de una ejecución
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub exercise_detected: Exercise,
    pub confidence: f32,
    pub overall_score: u32,
    pub performance_level: PerformanceLevel,
    pub rep_count: u32,
    /// Un mensaje por problema distinto, el más importante primero
    pub issues_detected: Vec<String>,
    pub recommendations: Vec<String>,
    pub key_frames: Vec<KeyFrame>,
    /// Segundos
    pub video_duration: f64,
    pub fps: f64,
    pub frames_analyzed: usize,
    pub valid_frames: usize,
    pub frames_rejected: usize,
    pub reps: Vec<RepSummary>,
    pub session: SessionSummary,
    /// Todas las observaciones en bruto, en orden
    pub issue_log: Vec<Issue>,
}

/// Lo que una ejecución terminada entrega para agregar
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub label: ExerciseLabel,
    pub score: f32,
    pub reps: Vec<RepSummary>,
    pub issues: Vec<Issue>,
    pub key_frames: Vec<KeyFrame>,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
    pub frames_analyzed: usize,
    pub valid_frames: usize,
    pub frames_rejected: usize,
    pub metadata: RunMetadata,
    pub session: SessionParams,
}

pub fn aggregate(summary: RunSummary) -> AnalysisResult {
    let (issues_detected, recommendations) = condense_issues(&summary.issues);
    let overall_score = summary.score.clamp(0.0, 100.0).round() as u32;
    let meta = summary.metadata;
    let fps = if meta.source_fps.is_finite() && meta.source_fps > 0.0 {
        meta.source_fps
    } else {
        DEFAULT_FPS
    };

    let video_duration = match meta.total_source_frames {
        Some(total) => total as f64 / fps,
        None => match (summary.first_timestamp, summary.last_timestamp) {
            (Some(first), Some(last)) => (last - first).max(0.0),
            _ => 0.0,
        },
    };

    let session = SessionSummary::from_reps(&summary.reps, video_duration, &summary.session);

    AnalysisResult {
        exercise_detected: summary.label.exercise,
        confidence: summary.label.confidence,
        overall_score,
        performance_level: PerformanceLevel::from_score(overall_score),
        rep_count: summary.reps.len() as u32,
        issues_detected,
        recommendations,
        key_frames: summary.key_frames,
        video_duration,
        fps,
        frames_analyzed: summary.frames_analyzed,
        valid_frames: summary.valid_frames,
        frames_rejected: summary.frames_rejected,
        reps: summary.reps,
        session,
        issue_log: summary.issues,
    }
}

struct IssueGroup<'a> {
    first_seen: usize,
    weight: u32,
    representative: &'a Issue,
}

/// Agrupa los problemas por código y ordena los grupos por frecuencia
/// ponderada por gravedad (en empate, el más temprano). Devuelve un mensaje por
/// grupo y las recomendaciones sin duplicados en el mismo orden.
pub fn condense_issues(issues: &[Issue]) -> (Vec<String>, Vec<String>) {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<IssueGroup> = Vec::new();

    for (pos, issue) in issues.iter().enumerate() {
        match index.get(issue.code.as_str()) {
            Some(&g) => {
                let group = &mut groups[g];
                group.weight += issue.severity.rank_weight();
                if issue.severity > group.representative.severity {
                    group.representative = issue;
                }
            }
            None => {
                index.insert(issue.code.as_str(), groups.len());
                groups.push(IssueGroup {
                    first_seen: pos,
                    weight: issue.severity.rank_weight(),
                    representative: issue,
                });
            }
        }
    }

    groups.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.first_seen.cmp(&b.first_seen)));

    let messages = groups
        .iter()
        .map(|g| g.representative.message.clone())
        .collect();
    let mut recommendations: Vec<String> = Vec::new();
    for group in &groups {
        let rec = &group.representative.recommendation;
        if !rec.is_empty() && !recommendations.contains(rec) {
            recommendations.push(rec.clone());
        }
    }
    (messages, recommendations)
}
