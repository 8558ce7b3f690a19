//! Análisis de la sesión completa sobre la secuencia de repeticiones:
//! ritmo, tendencia de la técnica, fatiga y necesidad de descanso.

use serde::{Deserialize, Serialize};

use crate::aggregator::RepSummary;

/// Umbrales del análisis de sesión
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// Repeticiones recientes usadas para la tendencia
    pub trend_window: usize,
    /// Pendiente (puntos por repetición) por debajo de la cual la técnica empeora
    pub declining_slope: f64,
    /// Repeticiones recientes usadas para detectar fatiga
    pub fatigue_window: usize,
    pub fatigue_score: f64,
    pub fatigue_slope: f64,
    /// Media y pendiente que dan la fatiga por superada
    pub recovery_score: f64,
    pub recovery_slope: f64,
    /// Repeticiones por minuto
    pub fast_pace: f64,
    pub slow_pace: f64,
    /// Sin este mínimo de repeticiones no se juzga el ritmo
    pub min_reps_for_pace: usize,
    pub rest_after_reps: u32,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            trend_window: 5,
            declining_slope: -1.0,
            fatigue_window: 10,
            fatigue_score: 60.0,
            fatigue_slope: -2.0,
            recovery_score: 75.0,
            recovery_slope: 1.0,
            fast_pace: 20.0,
            slow_pace: 5.0,
            min_reps_for_pace: 5,
            rest_after_reps: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pace {
    /// Demasiado rápido
    SlowDown,
    Steady,
    /// Demasiado lento tras varias repeticiones
    Encourage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormTrend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Repeticiones por minuto
    pub rep_rate: f64,
    pub pace: Pace,
    pub average_rep_score: Option<f64>,
    pub form_trend: FormTrend,
    /// Pendiente de la puntuación en las últimas repeticiones
    pub trend_slope: f64,
    /// Fatiga vigente al final de la sesión
    pub fatigue_detected: bool,
    pub rest_recommended: bool,
}

impl SessionSummary {
    /// `duration` en segundos
    pub fn from_reps(reps: &[RepSummary], duration: f64, params: &SessionParams) -> Self {
        let scores: Vec<f64> = reps.iter().map(|r| f64::from(r.score)).collect();
        let n = scores.len();

        let rep_rate = if duration > 0.0 {
            n as f64 / duration * 60.0
        } else {
            0.0
        };
        let pace = if n < params.min_reps_for_pace {
            Pace::Steady
        } else if rep_rate > params.fast_pace {
            Pace::SlowDown
        } else if rep_rate < params.slow_pace {
            Pace::Encourage
        } else {
            Pace::Steady
        };

        let window = params.trend_window.max(2);
        let trend_slope = if n >= window { slope(&scores[n - window..]) } else { 0.0 };
        let form_trend = if trend_slope > 0.0 {
            FormTrend::Improving
        } else if trend_slope < params.declining_slope {
            FormTrend::Declining
        } else {
            FormTrend::Stable
        };

        // la fatiga se activa y se recupera repetición a repetición
        let window = params.fatigue_window.max(2);
        let mut fatigued = false;
        let mut ever_fatigued = false;
        for end in window..=n {
            let recent = &scores[end - window..end];
            let mean = recent.iter().sum::<f64>() / window as f64;
            let s = slope(recent);
            if mean < params.fatigue_score && s < params.fatigue_slope {
                fatigued = true;
                ever_fatigued = true;
            } else if mean > params.recovery_score && s > params.recovery_slope {
                fatigued = false;
            }
        }

        Self {
            rep_rate,
            pace,
            average_rep_score: (n > 0).then(|| scores.iter().sum::<f64>() / n as f64),
            form_trend,
            trend_slope,
            fatigue_detected: fatigued,
            rest_recommended: ever_fatigued || n as u32 >= params.rest_after_reps,
        }
    }
}

/// Pendiente por mínimos cuadrados contra el índice. Con puntuaciones enteras
/// el numerador es exacto, así que una serie plana da 0.
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += y;
        sxy += x * y;
        sxx += x * x;
    }
    (n * sxy - sx * sy) / (n * sxx - sx * sx)
}
