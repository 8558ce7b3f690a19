use crate::feature_extractor::{Feature, FeatureSet};
use std::collections::VecDeque;

/// Muestras válidas mínimas para que el rango signifique algo
const MIN_SPAN_SAMPLES: usize = 3;

/// Ventana deslizante sobre las features más recientes
#[derive(Debug, Clone)]
pub struct FeatureWindow {
    buffer: VecDeque<FeatureSet>,
    capacity: usize,
}

impl FeatureWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Añade features y descarta las más antiguas si está llena
    pub fn push(&mut self, features: FeatureSet) {
        self.buffer.push_back(features);
        if self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// true cuando la ventana tiene `capacity` conjuntos
    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Muestras válidas de una feature, la más antigua primero
    pub fn values(&self, feature: Feature) -> Vec<f32> {
        self.buffer.iter().filter_map(|fs| fs.get(feature)).collect()
    }

    /// Rango robusto de una feature: percentil 90 menos percentil 10 de sus
    /// muestras válidas. Un único frame anómalo no simula movimiento.
    pub fn span(&self, feature: Feature) -> Option<f32> {
        let mut values = self.values(feature);
        if values.len() < MIN_SPAN_SAMPLES {
            return None;
        }
        values.sort_by(f32::total_cmp);
        Some(percentile(&values, 0.9) - percentile(&values, 0.1))
    }

    /// Fracción de muestras válidas dentro de `[min, max]`, 0 si no hay ninguna
    pub fn fraction_in_range(&self, feature: Feature, min: f32, max: f32) -> f32 {
        let values = self.values(feature);
        if values.is_empty() {
            return 0.0;
        }
        let inside = values.iter().filter(|v| (min..=max).contains(*v)).count();
        inside as f32 / values.len() as f32
    }
}

/// Percentil con interpolación lineal de un slice ya ordenado y no vacío
fn percentile(sorted: &[f32], q: f32) -> f32 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
