use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Joint, LandmarkFrame, DEFAULT_FPS};

/// Segmentos más cortos que esto (unidades normalizadas) no tienen dirección
const MIN_SEGMENT_LEN: f32 = 1e-6;
/// Denominador mínimo de los ratios de anchura; por debajo el cuerpo está de perfil
const MIN_WIDTH: f32 = 1e-3;

/// Articulaciones cuya visibilidad alimenta la métrica `visibility`
const CORE_JOINTS: [Joint; 12] = [
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
];

/// Medidas biomecánicas derivadas de un frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Feature {
    #[serde(rename = "knee_angle_left")]
    KneeAngleLeft,
    #[serde(rename = "knee_angle_right")]
    KneeAngleRight,
    /// Media de las rodillas válidas
    #[serde(rename = "knee_angle")]
    KneeAngle,
    #[serde(rename = "hip_angle_left")]
    HipAngleLeft,
    #[serde(rename = "hip_angle_right")]
    HipAngleRight,
    #[serde(rename = "hip_angle")]
    HipAngle,
    #[serde(rename = "elbow_angle_left")]
    ElbowAngleLeft,
    #[serde(rename = "elbow_angle_right")]
    ElbowAngleRight,
    #[serde(rename = "elbow_angle")]
    ElbowAngle,
    /// Cadera-hombro-codo: cuánto se separa el brazo del torso
    #[serde(rename = "upper_arm_angle")]
    UpperArmAngle,
    /// Hombro-cadera-tobillo por la línea media del cuerpo, 180 si está recto
    #[serde(rename = "body_line_deg")]
    BodyLineAngle,
    #[serde(rename = "torso_lean_deg")]
    TorsoLean,
    #[serde(rename = "knee_symmetry_delta")]
    KneeSymmetry,
    #[serde(rename = "hip_symmetry_delta")]
    HipSymmetry,
    #[serde(rename = "elbow_symmetry_delta")]
    ElbowSymmetry,
    /// Distancia entre tobillos sobre anchura de hombros
    #[serde(rename = "stance_width")]
    StanceWidth,
    /// Distancia entre rodillas sobre distancia entre tobillos; baja si las rodillas se cierran
    #[serde(rename = "knee_width_ratio")]
    KneeWidthRatio,
    #[serde(rename = "vertical_velocity")]
    VerticalVelocity,
    #[serde(rename = "knee_angular_speed")]
    KneeAngularSpeed,
    #[serde(rename = "elbow_angular_speed")]
    ElbowAngularSpeed,
    #[serde(rename = "visibility")]
    Visibility,
}

impl Feature {
    pub const COUNT: usize = 21;

    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::KneeAngleLeft,
        Feature::KneeAngleRight,
        Feature::KneeAngle,
        Feature::HipAngleLeft,
        Feature::HipAngleRight,
        Feature::HipAngle,
        Feature::ElbowAngleLeft,
        Feature::ElbowAngleRight,
        Feature::ElbowAngle,
        Feature::UpperArmAngle,
        Feature::BodyLineAngle,
        Feature::TorsoLean,
        Feature::KneeSymmetry,
        Feature::HipSymmetry,
        Feature::ElbowSymmetry,
        Feature::StanceWidth,
        Feature::KneeWidthRatio,
        Feature::VerticalVelocity,
        Feature::KneeAngularSpeed,
        Feature::ElbowAngularSpeed,
        Feature::Visibility,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::KneeAngleLeft => "knee_angle_left",
            Feature::KneeAngleRight => "knee_angle_right",
            Feature::KneeAngle => "knee_angle",
            Feature::HipAngleLeft => "hip_angle_left",
            Feature::HipAngleRight => "hip_angle_right",
            Feature::HipAngle => "hip_angle",
            Feature::ElbowAngleLeft => "elbow_angle_left",
            Feature::ElbowAngleRight => "elbow_angle_right",
            Feature::ElbowAngle => "elbow_angle",
            Feature::UpperArmAngle => "upper_arm_angle",
            Feature::BodyLineAngle => "body_line_deg",
            Feature::TorsoLean => "torso_lean_deg",
            Feature::KneeSymmetry => "knee_symmetry_delta",
            Feature::HipSymmetry => "hip_symmetry_delta",
            Feature::ElbowSymmetry => "elbow_symmetry_delta",
            Feature::StanceWidth => "stance_width",
            Feature::KneeWidthRatio => "knee_width_ratio",
            Feature::VerticalVelocity => "vertical_velocity",
            Feature::KneeAngularSpeed => "knee_angular_speed",
            Feature::ElbowAngularSpeed => "elbow_angular_speed",
            Feature::Visibility => "visibility",
        }
    }

    /// Ángulos articulares (no ratios, velocidades ni confianzas)
    pub fn is_joint_angle(self) -> bool {
        matches!(
            self,
            Feature::KneeAngleLeft
                | Feature::KneeAngleRight
                | Feature::KneeAngle
                | Feature::HipAngleLeft
                | Feature::HipAngleRight
                | Feature::HipAngle
                | Feature::ElbowAngleLeft
                | Feature::ElbowAngleRight
                | Feature::ElbowAngle
                | Feature::UpperArmAngle
                | Feature::BodyLineAngle
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identidad del frame del que salen las features
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRef {
    pub index: usize,
    pub timestamp: f64,
    pub image_ref: Option<String>,
}

/// Features de un frame. `None` marca una métrica cuyas articulaciones no eran
/// fiables; se trata como evidencia ausente, nunca como cero.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub frame: FrameRef,
    values: [Option<f32>; Feature::COUNT],
}

impl FeatureSet {
    pub fn new(frame: FrameRef, values: [Option<f32>; Feature::COUNT]) -> Self {
        Self { frame, values }
    }

    /// Todas las métricas inválidas
    pub fn invalid(frame: FrameRef) -> Self {
        Self::new(frame, [None; Feature::COUNT])
    }

    pub fn get(&self, feature: Feature) -> Option<f32> {
        self.values[feature.index()]
    }

    pub fn is_valid(&self, feature: Feature) -> bool {
        self.get(feature).is_some()
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Un frame es evidencia útil si al menos un ángulo articular es válido
    pub fn is_usable(&self) -> bool {
        Feature::ALL
            .iter()
            .any(|f| f.is_joint_angle() && self.is_valid(*f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, Option<f32>)> + '_ {
        Feature::ALL.iter().map(move |f| (*f, self.get(*f)))
    }
}

/// Parámetros del extractor
#[derive(Debug, Clone, Copy)]
pub struct ExtractorParams {
    /// Articulaciones bajo esta visibilidad se tratan como desconocidas (por defecto 0.5)
    pub visibility_threshold: f32,
    /// Paso de tiempo si los timestamps consecutivos no sirven (segundos)
    pub frame_interval: f64,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            visibility_threshold: 0.5,
            frame_interval: 1.0 / DEFAULT_FPS,
        }
    }
}

type Point = (f32, f32);

/// Ángulos izquierdo/derecho de un frame, reutilizados para la velocidad angular del siguiente
#[derive(Debug, Clone, Copy, Default)]
struct LimbAngles {
    knee: (Option<f32>, Option<f32>),
    hip: (Option<f32>, Option<f32>),
    elbow: (Option<f32>, Option<f32>),
}

impl LimbAngles {
    fn knee(&self) -> Option<f32> {
        mean_valid(self.knee.0, self.knee.1)
    }

    fn elbow(&self) -> Option<f32> {
        mean_valid(self.elbow.0, self.elbow.1)
    }
}

/// Convierte frames de landmarks en features. Sin estado: el frame anterior
/// llega como argumento.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor {
    params: ExtractorParams,
}

impl FeatureExtractor {
    pub fn new(params: ExtractorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExtractorParams {
        &self.params
    }

    pub fn extract(&self, current: &LandmarkFrame, previous: Option<&LandmarkFrame>) -> FeatureSet {
        let mut values = [None; Feature::COUNT];
        let mut put = |feature: Feature, value: Option<f32>| {
            values[feature.index()] = value.filter(|v| v.is_finite());
        };

        let angles = self.limb_angles(current);
        put(Feature::KneeAngleLeft, angles.knee.0);
        put(Feature::KneeAngleRight, angles.knee.1);
        put(Feature::KneeAngle, angles.knee());
        put(Feature::HipAngleLeft, angles.hip.0);
        put(Feature::HipAngleRight, angles.hip.1);
        put(Feature::HipAngle, mean_valid(angles.hip.0, angles.hip.1));
        put(Feature::ElbowAngleLeft, angles.elbow.0);
        put(Feature::ElbowAngleRight, angles.elbow.1);
        put(Feature::ElbowAngle, angles.elbow());

        put(Feature::KneeSymmetry, abs_delta(angles.knee.0, angles.knee.1));
        put(Feature::HipSymmetry, abs_delta(angles.hip.0, angles.hip.1));
        put(Feature::ElbowSymmetry, abs_delta(angles.elbow.0, angles.elbow.1));

        put(
            Feature::UpperArmAngle,
            mean_valid(
                self.angle_at(current, Joint::LeftHip, Joint::LeftShoulder, Joint::LeftElbow),
                self.angle_at(current, Joint::RightHip, Joint::RightShoulder, Joint::RightElbow),
            ),
        );

        let shoulders = self.midpoint(current, Joint::LeftShoulder, Joint::RightShoulder);
        let hips = self.midpoint(current, Joint::LeftHip, Joint::RightHip);
        let ankles = self.midpoint(current, Joint::LeftAnkle, Joint::RightAnkle);

        put(Feature::TorsoLean, shoulders.zip(hips).and_then(|(s, h)| lean_from_vertical(h, s)));
        put(
            Feature::BodyLineAngle,
            match (shoulders, hips, ankles) {
                (Some(s), Some(h), Some(a)) => joint_angle(s, h, a),
                _ => None,
            },
        );
        put(
            Feature::StanceWidth,
            self.width_ratio(
                current,
                (Joint::LeftAnkle, Joint::RightAnkle),
                (Joint::LeftShoulder, Joint::RightShoulder),
            ),
        );
        put(
            Feature::KneeWidthRatio,
            self.width_ratio(
                current,
                (Joint::LeftKnee, Joint::RightKnee),
                (Joint::LeftAnkle, Joint::RightAnkle),
            ),
        );

        if let Some(prev) = previous {
            let dt = self.time_step(current, prev);
            let prev_hips = self.midpoint(prev, Joint::LeftHip, Joint::RightHip);
            put(
                Feature::VerticalVelocity,
                hips.zip(prev_hips).map(|(now, before)| (now.1 - before.1) / dt),
            );

            let prev_angles = self.limb_angles(prev);
            put(Feature::KneeAngularSpeed, angular_speed(angles.knee(), prev_angles.knee(), dt));
            put(Feature::ElbowAngularSpeed, angular_speed(angles.elbow(), prev_angles.elbow(), dt));
        }

        // sin ninguna articulación visible el frame no aporta ninguna medida
        let tracked = CORE_JOINTS.iter().any(|j| self.point(current, *j).is_some());
        put(Feature::Visibility, tracked.then(|| current.min_visibility(&CORE_JOINTS)));

        FeatureSet::new(
            FrameRef {
                index: current.index,
                timestamp: current.timestamp,
                image_ref: current.image_ref.clone(),
            },
            values,
        )
    }

    fn limb_angles(&self, frame: &LandmarkFrame) -> LimbAngles {
        LimbAngles {
            knee: (
                self.angle_at(frame, Joint::LeftHip, Joint::LeftKnee, Joint::LeftAnkle),
                self.angle_at(frame, Joint::RightHip, Joint::RightKnee, Joint::RightAnkle),
            ),
            hip: (
                self.angle_at(frame, Joint::LeftShoulder, Joint::LeftHip, Joint::LeftKnee),
                self.angle_at(frame, Joint::RightShoulder, Joint::RightHip, Joint::RightKnee),
            ),
            elbow: (
                self.angle_at(frame, Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist),
                self.angle_at(frame, Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist),
            ),
        }
    }

    /// Posición de una articulación, si el detector confía lo suficiente
    fn point(&self, frame: &LandmarkFrame, joint: Joint) -> Option<Point> {
        let lm = frame.landmark(joint);
        (lm.visibility >= self.params.visibility_threshold).then_some((lm.x, lm.y))
    }

    fn angle_at(&self, frame: &LandmarkFrame, a: Joint, vertex: Joint, c: Joint) -> Option<f32> {
        joint_angle(
            self.point(frame, a)?,
            self.point(frame, vertex)?,
            self.point(frame, c)?,
        )
    }

    fn midpoint(&self, frame: &LandmarkFrame, a: Joint, b: Joint) -> Option<Point> {
        let (pa, pb) = (self.point(frame, a)?, self.point(frame, b)?);
        Some(((pa.0 + pb.0) / 2.0, (pa.1 + pb.1) / 2.0))
    }

    fn width_ratio(
        &self,
        frame: &LandmarkFrame,
        numerator: (Joint, Joint),
        denominator: (Joint, Joint),
    ) -> Option<f32> {
        let num = distance(self.point(frame, numerator.0)?, self.point(frame, numerator.1)?);
        let den = distance(self.point(frame, denominator.0)?, self.point(frame, denominator.1)?);
        (den >= MIN_WIDTH).then(|| num / den)
    }

    fn time_step(&self, current: &LandmarkFrame, previous: &LandmarkFrame) -> f32 {
        let dt = current.timestamp - previous.timestamp;
        if dt.is_finite() && dt > 0.0 {
            dt as f32
        } else {
            self.params.frame_interval as f32
        }
    }
}

/// Ángulo en `b` entre los segmentos hacia `a` y `c`, en grados [0, 180].
/// Devuelve `None` con segmentos degenerados (longitud cero).
pub fn joint_angle(a: Point, b: Point, c: Point) -> Option<f32> {
    let ba = (a.0 - b.0, a.1 - b.1);
    let bc = (c.0 - b.0, c.1 - b.1);

    let norm_ba = (ba.0 * ba.0 + ba.1 * ba.1).sqrt();
    let norm_bc = (bc.0 * bc.0 + bc.1 * bc.1).sqrt();
    if !norm_ba.is_finite() || !norm_bc.is_finite() {
        return None;
    }
    if norm_ba < MIN_SEGMENT_LEN || norm_bc < MIN_SEGMENT_LEN {
        return None;
    }

    let cosine = ((ba.0 * bc.0 + ba.1 * bc.1) / (norm_ba * norm_bc)).clamp(-1.0, 1.0);
    Some(cosine.acos().to_degrees().clamp(0.0, 180.0))
}

// ========== Auxiliares ==========

/// Ángulo entre el segmento `from → to` y la vertical de la imagen (y crece hacia abajo)
fn lean_from_vertical(from: Point, to: Point) -> Option<f32> {
    let v = (to.0 - from.0, to.1 - from.1);
    let norm = (v.0 * v.0 + v.1 * v.1).sqrt();
    if norm < MIN_SEGMENT_LEN {
        return None;
    }
    let cosine = (-v.1 / norm).clamp(-1.0, 1.0);
    Some(cosine.acos().to_degrees())
}

fn distance(a: Point, b: Point) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn mean_valid(left: Option<f32>, right: Option<f32>) -> Option<f32> {
    match (left, right) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

fn abs_delta(left: Option<f32>, right: Option<f32>) -> Option<f32> {
    Some((left? - right?).abs())
}

fn angular_speed(now: Option<f32>, before: Option<f32>, dt: f32) -> Option<f32> {
    Some((now? - before?).abs() / dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn right_and_straight_angles() {
        assert_relative_eq!(joint_angle((0.0, 0.0), (1.0, 0.0), (1.0, 1.0)).unwrap(), 90.0, epsilon = 1e-3);
        assert_relative_eq!(joint_angle((0.0, 0.0), (1.0, 0.0), (2.0, 0.0)).unwrap(), 180.0, epsilon = 1e-3);
        assert_relative_eq!(joint_angle((0.0, 0.0), (1.0, 0.0), (0.0, 0.0)).unwrap(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn degenerate_segments_are_invalid() {
        assert_eq!(joint_angle((0.0, 0.0), (0.0, 0.0), (1.0, 1.0)), None);
        assert_eq!(joint_angle((1.0, 1.0), (0.5, 0.5), (0.5, 0.5)), None);
        assert_eq!(joint_angle((f32::NAN, 0.0), (0.5, 0.5), (1.0, 0.5)), None);
    }

    proptest! {
        #[test]
        fn angle_is_always_in_range(
            ax in -2.0f32..2.0, ay in -2.0f32..2.0,
            bx in -2.0f32..2.0, by in -2.0f32..2.0,
            cx in -2.0f32..2.0, cy in -2.0f32..2.0,
        ) {
            if let Some(angle) = joint_angle((ax, ay), (bx, by), (cx, cy)) {
                prop_assert!(angle.is_finite());
                prop_assert!((0.0..=180.0).contains(&angle));
            }
        }
    }

    #[test]
    fn standing_pose_measurements() {
        let extractor = FeatureExtractor::default();
        let frame = synthetic::standing_frame(0, 0.0, 170.0, 180.0);
        let fs = extractor.extract(&frame, None);

        assert_relative_eq!(fs.get(Feature::KneeAngleLeft).unwrap(), 170.0, epsilon = 0.05);
        assert_relative_eq!(fs.get(Feature::KneeAngle).unwrap(), 170.0, epsilon = 0.05);
        assert_relative_eq!(fs.get(Feature::TorsoLean).unwrap(), 0.0, epsilon = 0.05);
        assert_relative_eq!(fs.get(Feature::KneeSymmetry).unwrap(), 0.0, epsilon = 0.05);
        assert_relative_eq!(fs.get(Feature::StanceWidth).unwrap(), 1.0, epsilon = 1e-3);
        assert_relative_eq!(fs.get(Feature::Visibility).unwrap(), 1.0);
        // sin frame anterior no hay velocidades
        assert!(!fs.is_valid(Feature::VerticalVelocity));
        assert!(!fs.is_valid(Feature::KneeAngularSpeed));
        assert!(fs.is_usable());
    }

    #[test]
    fn low_confidence_joint_invalidates_only_dependent_features() {
        let extractor = FeatureExtractor::default();
        let mut frame = synthetic::standing_frame(0, 0.0, 120.0, 180.0);
        let mut knee = frame.landmark(Joint::LeftKnee);
        knee.visibility = 0.2;
        frame.set(Joint::LeftKnee, knee);

        let fs = extractor.extract(&frame, None);
        assert!(!fs.is_valid(Feature::KneeAngleLeft));
        assert!(!fs.is_valid(Feature::HipAngleLeft));
        assert!(!fs.is_valid(Feature::KneeSymmetry));
        assert!(!fs.is_valid(Feature::HipSymmetry));
        assert!(!fs.is_valid(Feature::KneeWidthRatio));

        assert!(fs.is_valid(Feature::KneeAngleRight));
        assert!(fs.is_valid(Feature::ElbowAngleLeft));
        assert!(fs.is_valid(Feature::TorsoLean));
        assert!(fs.is_valid(Feature::StanceWidth));
        // el ángulo bilateral usa el lado visible
        assert_relative_eq!(fs.get(Feature::KneeAngle).unwrap(), 120.0, epsilon = 0.05);
        assert_relative_eq!(fs.get(Feature::Visibility).unwrap(), 0.2);
    }

    #[test]
    fn velocities_use_timestamps() {
        let extractor = FeatureExtractor::default();
        let prev = synthetic::standing_frame(0, 0.0, 170.0, 180.0);
        let cur = synthetic::standing_frame(1, 0.5, 150.0, 180.0);
        let fs = extractor.extract(&cur, Some(&prev));

        assert_relative_eq!(fs.get(Feature::KneeAngularSpeed).unwrap(), 40.0, epsilon = 0.2);
        // las caderas bajan al flexionar: velocidad positiva (hacia abajo)
        assert!(fs.get(Feature::VerticalVelocity).unwrap() > 0.0);
    }

    #[test]
    fn non_increasing_timestamp_falls_back_to_frame_interval() {
        let extractor = FeatureExtractor::new(ExtractorParams {
            visibility_threshold: 0.5,
            frame_interval: 0.1,
        });
        let prev = synthetic::standing_frame(0, 1.0, 170.0, 180.0);
        let cur = synthetic::standing_frame(1, 1.0, 160.0, 180.0);
        let fs = extractor.extract(&cur, Some(&prev));
        assert_relative_eq!(fs.get(Feature::KneeAngularSpeed).unwrap(), 100.0, epsilon = 0.5);
    }

    #[test]
    fn occluded_frame_has_no_usable_features() {
        let extractor = FeatureExtractor::default();
        let fs = extractor.extract(&LandmarkFrame::occluded(4, 0.2), None);
        assert!(!fs.is_usable());
        assert_eq!(fs.valid_count(), 0);
        assert_eq!(fs.get(Feature::Visibility), None);
        assert_eq!(fs.frame.index, 4);
    }

    #[test]
    fn partly_hidden_body_still_reports_visibility() {
        let extractor = FeatureExtractor::default();
        let mut frame = synthetic::standing_frame(0, 0.0, 170.0, 180.0);
        for joint in [Joint::LeftWrist, Joint::RightWrist, Joint::LeftElbow, Joint::RightElbow] {
            let mut lm = frame.landmark(joint);
            lm.visibility = 0.1;
            frame.set(joint, lm);
        }
        let fs = extractor.extract(&frame, None);
        assert!(fs.is_usable());
        assert!(!fs.is_valid(Feature::ElbowAngle));
        assert_relative_eq!(fs.get(Feature::Visibility).unwrap(), 0.1);
    }

    #[test]
    fn pushup_pose_is_horizontal_and_straight() {
        let extractor = FeatureExtractor::default();
        let fs = extractor.extract(&synthetic::pushup_frame(0, 0.0, 90.0), None);
        let lean = fs.get(Feature::TorsoLean).unwrap();
        assert!(lean > 55.0 && lean < 125.0, "lean {}", lean);
        assert_relative_eq!(fs.get(Feature::BodyLineAngle).unwrap(), 180.0, epsilon = 0.5);
        assert_relative_eq!(fs.get(Feature::ElbowAngle).unwrap(), 90.0, epsilon = 0.05);
    }
}
