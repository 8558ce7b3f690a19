use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngleFilterConfig {
    /// Ventana de la mediana móvil en muestras (1 la desactiva)
    pub window: usize,
    /// Factor de suavizado exponencial; 1.0 deja pasar la mediana tal cual
    pub alpha: f32,
}

impl Default for AngleFilterConfig {
    fn default() -> Self {
        Self {
            window: 5,
            alpha: 1.0,
        }
    }
}

/// Suaviza el ángulo principal antes del contador de repeticiones.
/// La mediana móvil elimina fallos del detector de un solo frame y la EMA
/// opcional recorta el temblor restante.
#[derive(Debug, Clone)]
pub struct AngleFilter {
    history: VecDeque<f32>,
    prev: Option<f32>,
    config: AngleFilterConfig,
}

impl AngleFilter {
    pub fn new(config: AngleFilterConfig) -> Self {
        let config = AngleFilterConfig {
            window: config.window.max(1),
            alpha: config.alpha.clamp(0.0, 1.0),
        };
        Self {
            history: VecDeque::with_capacity(config.window),
            prev: None,
            config,
        }
    }

    pub fn update(&mut self, angle: f32) -> f32 {
        self.history.push_back(angle);
        if self.history.len() > self.config.window {
            self.history.pop_front();
        }

        let mut sorted: Vec<f32> = self.history.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let filtered = match self.prev {
            Some(prev) => self.config.alpha * median + (1.0 - self.config.alpha) * prev,
            None => median,
        };
        self.prev = Some(filtered);
        filtered
    }
}
