use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};

use crate::types::{Joint, Landmark, LandmarkFrame, NUM_JOINTS};

const HEADER: [&str; 7] = ["frame", "timestamp", "joint", "x", "y", "visibility", "image"];

struct PendingFrame {
    timestamp: f64,
    landmarks: [Landmark; NUM_JOINTS],
    image_ref: Option<String>,
}

/// Carga frames de landmarks desde un CSV en formato largo:
/// `frame,timestamp,joint,x,y,visibility[,image]`, una fila por articulación.
///
/// `joint` es un nombre (`left_knee`) o un índice MediaPipe de 33 puntos; los
/// índices no seguidos se ignoran. Las articulaciones ausentes de un frame quedan
/// con visibilidad 0. Los frames salen ordenados por número.
pub fn load_frames_from_csv(path: impl AsRef<Path>) -> Result<Vec<LandmarkFrame>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

    let mut frames: BTreeMap<usize, PendingFrame> = BTreeMap::new();

    for (row_idx, result) in reader.records().enumerate() {
        let line = row_idx + 2;
        let record = result.with_context(|| format!("Fila {} inválida en {:?}", line, path))?;
        if record.len() < 6 {
            bail!("La fila {} tiene {} columnas, se esperaban al menos 6", line, record.len());
        }

        let frame: usize = record[0]
            .parse()
            .with_context(|| format!("Número de frame inválido en la fila {}", line))?;
        let timestamp: f64 = record[1]
            .parse()
            .with_context(|| format!("Timestamp inválido en la fila {}", line))?;

        let joint = match record[2].parse::<usize>() {
            Ok(idx) => match Joint::from_mediapipe_index(idx) {
                Some(joint) => joint,
                None => continue,
            },
            Err(_) => match Joint::from_name(&record[2]) {
                Some(joint) => joint,
                None => bail!("Articulación desconocida {:?} en la fila {}", &record[2], line),
            },
        };

        let x: f32 = record[3]
            .parse()
            .with_context(|| format!("x inválida en la fila {}", line))?;
        let y: f32 = record[4]
            .parse()
            .with_context(|| format!("y inválida en la fila {}", line))?;
        let visibility: f32 = record[5]
            .parse()
            .with_context(|| format!("Visibilidad inválida en la fila {}", line))?;
        let image_ref = record.get(6).filter(|s| !s.is_empty()).map(str::to_string);

        let pending = frames.entry(frame).or_insert_with(|| PendingFrame {
            timestamp,
            landmarks: [Landmark::default(); NUM_JOINTS],
            image_ref: None,
        });
        ensure!(
            pending.timestamp == timestamp,
            "El frame {} tiene timestamps distintos ({} y {}, fila {})",
            frame,
            pending.timestamp,
            timestamp,
            line
        );
        pending.landmarks[joint.index()] = Landmark::new(x, y, visibility);
        if image_ref.is_some() {
            pending.image_ref = image_ref;
        }
    }

    ensure!(!frames.is_empty(), "CSV {:?} contains no landmark rows", path);

    Ok(frames
        .into_iter()
        .map(|(index, pending)| LandmarkFrame {
            index,
            timestamp: pending.timestamp,
            landmarks: pending.landmarks,
            image_ref: pending.image_ref,
        })
        .collect())
}

/// Escribe frames en el formato que lee [`load_frames_from_csv`]
pub fn write_frames_to_csv(path: impl AsRef<Path>, frames: &[LandmarkFrame]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("No se pudo crear el CSV {:?}", path))?;

    writer.write_record(HEADER)?;
    for frame in frames {
        let image = frame.image_ref.as_deref().unwrap_or("");
        for joint in Joint::ALL {
            let lm = frame.landmark(joint);
            writer.write_record([
                frame.index.to_string(),
                frame.timestamp.to_string(),
                joint.name().to_string(),
                lm.x.to_string(),
                lm.y.to_string(),
                lm.visibility.to_string(),
                image.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
