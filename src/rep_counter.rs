use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::angle_filter::AngleFilter;
use crate::profile::RepThresholds;

/// Fases de una repetición sobre el ángulo principal suavizado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Extendido, esperando a que empiece el movimiento
    Top,
    /// El ángulo se cierra
    Descending,
    /// Punto de giro alcanzado, esperando la permanencia
    Bottom,
    /// El ángulo se abre de vuelta hacia arriba
    Ascending,
}

/// Una repetición completada
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepRecord {
    pub number: u32,
    pub start_frame: usize,
    pub bottom_frame: usize,
    pub bottom_timestamp: f64,
    pub end_frame: usize,
    /// Menor ángulo principal suavizado alcanzado
    pub depth: f32,
    /// Mayor ángulo principal suavizado antes del descenso
    pub peak: f32,
    pub duration_seconds: f64,
    /// Alguna regla de frame falló durante esta repetición
    pub form_violated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepState {
    pub phase: Phase,
    /// Extremo acumulado de la fase actual (máximo arriba, mínimo abajo)
    pub extremum: Option<f32>,
    pub count: u32,
    pub last_rep: Option<RepRecord>,
}

/// Resultado de procesar un frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepStep {
    pub phase: Phase,
    /// Este frame es hasta ahora el punto más profundo de la repetición
    pub new_extremum: bool,
    pub completed: Option<RepRecord>,
}

/// Datos de la repetición en curso
#[derive(Debug, Clone, Copy)]
struct OpenRep {
    start_frame: usize,
    start_time: f64,
    peak: f32,
    depth: f32,
    depth_frame: usize,
    depth_time: f64,
    /// Mínimo local para detectar el giro; se reinicia si la repetición baja dos veces
    trough: f32,
    crest: f32,
    violated: bool,
}

/// Cuenta repeticiones con una máquina de estados de cuatro fases.
///
/// TOP → DESCENDING → BOTTOM → ASCENDING → TOP. Solo un ciclo completo suma;
/// un descenso que gira por encima del umbral inferior, o sin recorrido
/// suficiente, se abandona.
#[derive(Debug, Clone)]
pub struct RepCounter {
    thresholds: RepThresholds,
    filter: AngleFilter,
    dwell_frames: usize,
    phase: Phase,
    phase_frames: usize,
    top_peak: Option<f32>,
    open: Option<OpenRep>,
    count: u32,
    last_rep: Option<RepRecord>,
}

impl RepCounter {
    /// `fps` es la frecuencia efectiva con la que llegan los frames
    pub fn new(thresholds: RepThresholds, fps: f64) -> Self {
        let dwell = (f64::from(thresholds.min_phase_seconds) * fps).ceil();
        Self {
            filter: AngleFilter::new(thresholds.smoothing),
            thresholds,
            dwell_frames: if dwell.is_finite() && dwell > 0.0 { dwell as usize } else { 0 },
            phase: Phase::Top,
            phase_frames: 0,
            top_peak: None,
            open: None,
            count: 0,
            last_rep: None,
        }
    }

    pub fn thresholds(&self) -> &RepThresholds {
        &self.thresholds
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Hay una repetición en marcha
    pub fn in_rep(&self) -> bool {
        self.phase != Phase::Top
    }

    pub fn state(&self) -> RepState {
        let extremum = match self.phase {
            Phase::Top => self.top_peak,
            Phase::Ascending => self.open.map(|o| o.crest),
            Phase::Descending | Phase::Bottom => self.open.map(|o| o.depth),
        };
        RepState {
            phase: self.phase,
            extremum,
            count: self.count,
            last_rep: self.last_rep,
        }
    }

    /// Marca la repetición en curso; sin efecto entre repeticiones
    pub fn mark_violation(&mut self) {
        if let Some(open) = self.open.as_mut() {
            open.violated = true;
        }
    }

    /// Procesa el ángulo principal de un frame. Los ángulos inválidos se saltan
    /// del todo: ni transición ni avance de la permanencia.
    pub fn update(&mut self, frame: usize, timestamp: f64, angle: Option<f32>) -> RepStep {
        let Some(raw) = angle.filter(|a| a.is_finite()) else {
            return self.step(false, None);
        };
        let a = self.filter.update(raw);
        let t = self.thresholds;
        self.phase_frames += 1;

        match self.phase {
            Phase::Top => {
                let peak = self.top_peak.map_or(a, |p| p.max(a));
                self.top_peak = Some(peak);
                if self.phase_frames > self.dwell_frames && a <= peak - t.release_delta {
                    self.open = Some(OpenRep {
                        start_frame: frame,
                        start_time: timestamp,
                        peak,
                        depth: a,
                        depth_frame: frame,
                        depth_time: timestamp,
                        trough: a,
                        crest: a,
                        violated: false,
                    });
                    self.enter(Phase::Descending);
                    return self.step(true, None);
                }
                self.step(false, None)
            }
            Phase::Descending => {
                let Some(mut open) = self.open else {
                    self.enter(Phase::Top);
                    return self.step(false, None);
                };
                let deeper = open.extend(a, frame, timestamp);
                let mut phase = Phase::Descending;
                if !deeper && a >= open.trough + t.reversal_delta {
                    if open.depth <= t.bottom_angle && open.peak - open.depth >= t.min_excursion {
                        phase = Phase::Bottom;
                    } else {
                        debug!(
                            frame,
                            depth = open.depth,
                            peak = open.peak,
                            "medio ciclo abandonado"
                        );
                        self.open = None;
                        self.top_peak = Some(a);
                        self.enter(Phase::Top);
                        return self.step(false, None);
                    }
                }
                self.open = Some(open);
                if phase != self.phase {
                    self.enter(phase);
                }
                self.step(deeper, None)
            }
            Phase::Bottom => {
                let Some(mut open) = self.open else {
                    self.enter(Phase::Top);
                    return self.step(false, None);
                };
                let deeper = open.extend(a, frame, timestamp);
                if self.phase_frames > self.dwell_frames {
                    open.crest = a;
                    self.open = Some(open);
                    self.enter(Phase::Ascending);
                } else {
                    self.open = Some(open);
                }
                self.step(deeper, None)
            }
            Phase::Ascending => {
                let Some(mut open) = self.open else {
                    self.enter(Phase::Top);
                    return self.step(false, None);
                };
                open.crest = open.crest.max(a);

                if a >= t.top_angle {
                    self.count += 1;
                    let record = RepRecord {
                        number: self.count,
                        start_frame: open.start_frame,
                        bottom_frame: open.depth_frame,
                        bottom_timestamp: open.depth_time,
                        end_frame: frame,
                        depth: open.depth,
                        peak: open.peak,
                        duration_seconds: (timestamp - open.start_time).max(0.0),
                        form_violated: open.violated,
                    };
                    debug!(
                        rep = record.number,
                        depth = record.depth,
                        duration = record.duration_seconds,
                        "repetición completada"
                    );
                    self.last_rep = Some(record);
                    self.open = None;
                    self.top_peak = Some(a);
                    self.enter(Phase::Top);
                    return self.step(false, Some(record));
                }

                if a <= open.crest - t.release_delta {
                    // vuelve a bajar antes de llegar arriba: misma repetición
                    open.trough = a;
                    let deeper = open.extend(a, frame, timestamp);
                    self.open = Some(open);
                    self.enter(Phase::Descending);
                    return self.step(deeper, None);
                }

                self.open = Some(open);
                self.step(false, None)
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_frames = 0;
    }

    fn step(&self, new_extremum: bool, completed: Option<RepRecord>) -> RepStep {
        RepStep {
            phase: self.phase,
            new_extremum,
            completed,
        }
    }
}

impl OpenRep {
    /// Sigue el mínimo; true si `angle` es el nuevo punto más profundo
    fn extend(&mut self, angle: f32, frame: usize, timestamp: f64) -> bool {
        self.trough = self.trough.min(angle);
        if angle < self.depth {
            self.depth = angle;
            self.depth_frame = frame;
            self.depth_time = timestamp;
            true
        } else {
            false
        }
    }
}
