use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AnalysisError;

/// Articulaciones que lleva cada frame
pub const NUM_JOINTS: usize = 19;

/// Frecuencia nominal cuando el llamador no indica otra (Hz)
pub const DEFAULT_FPS: f64 = 30.0;

/// Articulaciones seguidas por el pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Joint {
    Nose,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl Joint {
    pub const ALL: [Joint; NUM_JOINTS] = [
        Joint::Nose,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
        Joint::LeftHeel,
        Joint::RightHeel,
        Joint::LeftFootIndex,
        Joint::RightFootIndex,
    ];

    /// Posición de la articulación dentro de `LandmarkFrame::landmarks`
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::Nose => "nose",
            Joint::LeftEar => "left_ear",
            Joint::RightEar => "right_ear",
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftElbow => "left_elbow",
            Joint::RightElbow => "right_elbow",
            Joint::LeftWrist => "left_wrist",
            Joint::RightWrist => "right_wrist",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftKnee => "left_knee",
            Joint::RightKnee => "right_knee",
            Joint::LeftAnkle => "left_ankle",
            Joint::RightAnkle => "right_ankle",
            Joint::LeftHeel => "left_heel",
            Joint::RightHeel => "right_heel",
            Joint::LeftFootIndex => "left_foot_index",
            Joint::RightFootIndex => "right_foot_index",
        }
    }

    /// Acepta `left_knee` y también `LEFT_KNEE` en mayúsculas
    pub fn from_name(name: &str) -> Option<Joint> {
        let lower = name.trim().to_ascii_lowercase();
        Joint::ALL.iter().copied().find(|j| j.name() == lower)
    }

    /// Traduce la numeración BlazePose de 33 puntos al subconjunto seguido
    pub fn from_mediapipe_index(idx: usize) -> Option<Joint> {
        let joint = match idx {
            0 => Joint::Nose,
            7 => Joint::LeftEar,
            8 => Joint::RightEar,
            11 => Joint::LeftShoulder,
            12 => Joint::RightShoulder,
            13 => Joint::LeftElbow,
            14 => Joint::RightElbow,
            15 => Joint::LeftWrist,
            16 => Joint::RightWrist,
            23 => Joint::LeftHip,
            24 => Joint::RightHip,
            25 => Joint::LeftKnee,
            26 => Joint::RightKnee,
            27 => Joint::LeftAnkle,
            28 => Joint::RightAnkle,
            29 => Joint::LeftHeel,
            30 => Joint::RightHeel,
            31 => Joint::LeftFootIndex,
            32 => Joint::RightFootIndex,
            _ => return None,
        };
        Some(joint)
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Posición normalizada de una articulación y la visibilidad que da el detector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self { x, y, visibility }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.visibility.is_finite()
    }
}

/// Un frame de landmarks tal como lo entrega el detector de pose externo.
///
/// El conjunto de articulaciones siempre está completo: las ocluidas aparecen
/// con visibilidad baja en lugar de faltar.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    pub index: usize,
    /// Segundos desde el inicio de la grabación
    pub timestamp: f64,
    pub landmarks: [Landmark; NUM_JOINTS],
    /// Referencia a una imagen guardada por el llamador (p. ej. una miniatura)
    pub image_ref: Option<String>,
}

impl LandmarkFrame {
    pub fn new(index: usize, timestamp: f64, landmarks: [Landmark; NUM_JOINTS]) -> Self {
        Self {
            index,
            timestamp,
            landmarks,
            image_ref: None,
        }
    }

    /// Construye un frame a partir de un slice ordenado como `Joint::ALL`
    pub fn from_points(
        index: usize,
        timestamp: f64,
        points: &[Landmark],
    ) -> Result<Self, AnalysisError> {
        if points.len() != NUM_JOINTS {
            return Err(AnalysisError::InvalidLandmarkData {
                frame: index,
                reason: format!("expected {} landmarks, got {}", NUM_JOINTS, points.len()),
            });
        }
        if let Some(pos) = points.iter().position(|p| !p.is_finite()) {
            return Err(AnalysisError::InvalidLandmarkData {
                frame: index,
                reason: format!("non-finite coordinates for {}", Joint::ALL[pos]),
            });
        }

        let mut landmarks = [Landmark::default(); NUM_JOINTS];
        landmarks.copy_from_slice(points);
        Ok(Self::new(index, timestamp, landmarks))
    }

    /// Frame sin ninguna articulación utilizable
    pub fn occluded(index: usize, timestamp: f64) -> Self {
        Self::new(index, timestamp, [Landmark::default(); NUM_JOINTS])
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn landmark(&self, joint: Joint) -> Landmark {
        self.landmarks[joint.index()]
    }

    pub fn set(&mut self, joint: Joint, landmark: Landmark) {
        self.landmarks[joint.index()] = landmark;
    }

    /// Visibilidad mínima entre las articulaciones dadas
    pub fn min_visibility(&self, joints: &[Joint]) -> f32 {
        joints
            .iter()
            .map(|j| self.landmark(*j).visibility)
            .fold(1.0f32, f32::min)
    }
}

/// Ejercicios que conoce el pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exercise {
    Squat,
    #[serde(alias = "push_up")]
    Pushup,
    BicepCurl,
    Plank,
    Unknown,
}

impl Exercise {
    pub const KNOWN: [Exercise; 4] = [
        Exercise::Squat,
        Exercise::Pushup,
        Exercise::BicepCurl,
        Exercise::Plank,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Exercise::Squat => "squat",
            Exercise::Pushup => "pushup",
            Exercise::BicepCurl => "bicep_curl",
            Exercise::Plank => "plank",
            Exercise::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Veredicto del clasificador; las etapas posteriores lo leen, nunca lo modifican
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExerciseLabel {
    pub exercise: Exercise,
    pub confidence: f32,
}

impl ExerciseLabel {
    pub fn unknown() -> Self {
        Self {
            exercise: Exercise::Unknown,
            confidence: 0.0,
        }
    }
}

/// Muestreo indicado por la fuente de frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Frames por segundo del vídeo original
    pub source_fps: f64,
    /// La fuente entrega uno de cada `frame_step` frames
    pub frame_step: u32,
    /// Frames totales del original, si se conocen
    pub total_source_frames: Option<u64>,
}

impl RunMetadata {
    pub fn new(source_fps: f64) -> Self {
        Self {
            source_fps,
            frame_step: 1,
            total_source_frames: None,
        }
    }

    /// Frecuencia real con la que llegan los frames al pipeline
    pub fn effective_fps(&self) -> f64 {
        let fps = if self.source_fps.is_finite() && self.source_fps > 0.0 {
            self.source_fps
        } else {
            DEFAULT_FPS
        };
        fps / f64::from(self.frame_step.max(1))
    }

    pub fn frame_interval(&self) -> f64 {
        1.0 / self.effective_fps()
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new(DEFAULT_FPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_indices_follow_declaration_order() {
        for (i, joint) in Joint::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
            assert_eq!(Joint::from_name(joint.name()), Some(*joint));
        }
        assert_eq!(Joint::from_name("LEFT_KNEE"), Some(Joint::LeftKnee));
        assert_eq!(Joint::from_mediapipe_index(26), Some(Joint::RightKnee));
        assert_eq!(Joint::from_mediapipe_index(1), None);
    }

    #[test]
    fn from_points_rejects_wrong_joint_count() {
        let points = vec![Landmark::new(0.5, 0.5, 1.0); NUM_JOINTS - 1];
        let err = LandmarkFrame::from_points(3, 0.1, &points).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidLandmarkData { frame: 3, .. }));
    }

    #[test]
    fn from_points_rejects_nan() {
        let mut points = vec![Landmark::new(0.5, 0.5, 1.0); NUM_JOINTS];
        points[Joint::LeftKnee.index()].x = f32::NAN;
        assert!(LandmarkFrame::from_points(0, 0.0, &points).is_err());
    }

    #[test]
    fn effective_fps_accounts_for_decimation() {
        let meta = RunMetadata {
            source_fps: 30.0,
            frame_step: 3,
            total_source_frames: Some(300),
        };
        assert!((meta.effective_fps() - 10.0).abs() < 1e-9);

        let broken = RunMetadata::new(0.0);
        assert!((broken.effective_fps() - DEFAULT_FPS).abs() < 1e-9);
    }

    #[test]
    fn exercise_accepts_push_up_alias() {
        let ex: Exercise = serde_json::from_str("\"push_up\"").unwrap();
        assert_eq!(ex, Exercise::Pushup);
        assert_eq!(serde_json::to_string(&Exercise::BicepCurl).unwrap(), "\"bicep_curl\"");
    }
}
