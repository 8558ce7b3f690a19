//! Generadores de poses sintéticas para tests. La geometría se construye para
//! que los ángulos extraídos coincidan exactamente con los pedidos.

use crate::types::{Joint, Landmark, LandmarkFrame, NUM_JOINTS};

const SHIN: f32 = 0.2;
const THIGH: f32 = 0.2;
const TORSO: f32 = 0.3;
const UPPER_ARM: f32 = 0.15;
const FOREARM: f32 = 0.15;

fn frame_from(index: usize, timestamp: f64, joints: &[(Joint, (f32, f32))]) -> LandmarkFrame {
    let mut frame = LandmarkFrame::new(index, timestamp, [Landmark::default(); NUM_JOINTS]);
    for (joint, (x, y)) in joints {
        frame.set(*joint, Landmark::new(*x, *y, 1.0));
    }
    frame
}

/// Vista frontal de una persona de pie: rodillas flexionadas por igual a
/// `knee_angle`, caderas sobre los tobillos, antebrazos a `elbow_angle`.
pub(crate) fn standing_frame(index: usize, timestamp: f64, knee_angle: f32, elbow_angle: f32) -> LandmarkFrame {
    let alpha = ((180.0 - knee_angle) / 2.0).to_radians();
    let theta = elbow_angle.to_radians();
    let mut joints = Vec::with_capacity(NUM_JOINTS);

    let mut shoulder_y = 0.0;
    for (side, x) in [(0, 0.42f32), (1, 0.58f32)] {
        let ankle = (x, 0.9);
        let knee = (ankle.0 + SHIN * alpha.sin(), ankle.1 - SHIN * alpha.cos());
        let hip = (ankle.0, knee.1 - THIGH * alpha.cos());
        let shoulder = (hip.0, hip.1 - TORSO);
        let elbow = (shoulder.0, shoulder.1 + UPPER_ARM);
        let wrist = (elbow.0 + FOREARM * theta.sin(), elbow.1 - FOREARM * theta.cos());
        shoulder_y = shoulder.1;

        let j = |left, right| if side == 0 { left } else { right };
        joints.push((j(Joint::LeftAnkle, Joint::RightAnkle), ankle));
        joints.push((j(Joint::LeftKnee, Joint::RightKnee), knee));
        joints.push((j(Joint::LeftHip, Joint::RightHip), hip));
        joints.push((j(Joint::LeftShoulder, Joint::RightShoulder), shoulder));
        joints.push((j(Joint::LeftElbow, Joint::RightElbow), elbow));
        joints.push((j(Joint::LeftWrist, Joint::RightWrist), wrist));
        joints.push((j(Joint::LeftHeel, Joint::RightHeel), (ankle.0 - 0.02, 0.92)));
        joints.push((j(Joint::LeftFootIndex, Joint::RightFootIndex), (ankle.0 + 0.05, 0.92)));
        joints.push((j(Joint::LeftEar, Joint::RightEar), (ankle.0 + 0.04 * (1.0 - 2.0 * side as f32), shoulder.1 - 0.1)));
    }
    joints.push((Joint::Nose, (0.5, shoulder_y - 0.1)));

    frame_from(index, timestamp, &joints)
}

/// Vista lateral de una flexión: cuerpo recto de hombros a tobillos, manos bajo
/// los hombros, codos a `elbow_angle`.
pub(crate) fn pushup_frame(index: usize, timestamp: f64, elbow_angle: f32) -> LandmarkFrame {
    let beta = ((180.0 - elbow_angle) / 2.0).to_radians();
    let mut joints = Vec::with_capacity(NUM_JOINTS);

    for (side, dy) in [(0, -0.01f32), (1, 0.01f32)] {
        let wrist = (0.3, 0.85 + dy);
        let elbow = (wrist.0 - UPPER_ARM * beta.sin(), wrist.1 - FOREARM * beta.cos());
        let shoulder = (wrist.0, elbow.1 - UPPER_ARM * beta.cos());
        let ankle = (0.8, 0.85 + dy);
        let hip = ((shoulder.0 + ankle.0) / 2.0, (shoulder.1 + ankle.1) / 2.0);
        let knee = ((hip.0 + ankle.0) / 2.0, (hip.1 + ankle.1) / 2.0);

        let j = |left, right| if side == 0 { left } else { right };
        joints.push((j(Joint::LeftWrist, Joint::RightWrist), wrist));
        joints.push((j(Joint::LeftElbow, Joint::RightElbow), elbow));
        joints.push((j(Joint::LeftShoulder, Joint::RightShoulder), shoulder));
        joints.push((j(Joint::LeftHip, Joint::RightHip), hip));
        joints.push((j(Joint::LeftKnee, Joint::RightKnee), knee));
        joints.push((j(Joint::LeftAnkle, Joint::RightAnkle), ankle));
        joints.push((j(Joint::LeftHeel, Joint::RightHeel), (ankle.0 + 0.02, ankle.1 - 0.02)));
        joints.push((j(Joint::LeftFootIndex, Joint::RightFootIndex), (ankle.0 + 0.01, ankle.1 + 0.03)));
        joints.push((j(Joint::LeftEar, Joint::RightEar), (shoulder.0 - 0.05, shoulder.1 - 0.02)));
        if side == 0 {
            joints.push((Joint::Nose, (shoulder.0 - 0.08, shoulder.1)));
        }
    }

    frame_from(index, timestamp, &joints)
}

/// Onda triangular que empieza y acaba en `high`, un valle por ciclo
pub(crate) fn oscillate(cycles: usize, high: f32, low: f32, frames_per_cycle: usize) -> Vec<f32> {
    let half = (frames_per_cycle / 2).max(1);
    let mut out = Vec::with_capacity(cycles * frames_per_cycle + 1);
    for _ in 0..cycles {
        for i in 0..half {
            out.push(high - (high - low) * i as f32 / half as f32);
        }
        for i in 0..half {
            out.push(low + (high - low) * i as f32 / half as f32);
        }
    }
    out.push(high);
    out
}

/// Convierte ángulos en frames a `fps`, con `hold` frames de relleno al final
pub(crate) fn frames_from_angles(
    angles: &[f32],
    hold: usize,
    fps: f64,
    make: impl Fn(usize, f64, f32) -> LandmarkFrame,
) -> Vec<LandmarkFrame> {
    let last = angles.last().copied().unwrap_or(180.0);
    angles
        .iter()
        .copied()
        .chain(std::iter::repeat(last).take(hold))
        .enumerate()
        .map(|(i, angle)| make(i, i as f64 / fps, angle))
        .collect()
}

pub(crate) fn squat_session(cycles: usize, bottom: f32) -> Vec<LandmarkFrame> {
    frames_from_angles(&oscillate(cycles, 170.0, bottom, 40), 20, 20.0, |i, ts, a| {
        standing_frame(i, ts, a, 180.0)
    })
}

pub(crate) fn curl_session(cycles: usize) -> Vec<LandmarkFrame> {
    frames_from_angles(&oscillate(cycles, 165.0, 45.0, 40), 20, 20.0, |i, ts, a| {
        standing_frame(i, ts, 178.0, a)
    })
}

pub(crate) fn pushup_session(cycles: usize) -> Vec<LandmarkFrame> {
    frames_from_angles(&oscillate(cycles, 170.0, 80.0, 40), 20, 20.0, pushup_frame)
}

pub(crate) fn plank_session(frames: usize) -> Vec<LandmarkFrame> {
    (0..frames)
        .map(|i| pushup_frame(i, i as f64 / 20.0, 170.0))
        .collect()
}
