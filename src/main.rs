/*
posecoach - Evaluación de ejercicios a partir de landmarks de pose

Sistema de análisis que:
1. Lee una o varias grabaciones de landmarks (CSV, una fila por articulación y frame)
2. Identifica el ejercicio y cuenta las repeticiones
3. Puntúa la técnica y resume la sesión (ritmo, tendencia, fatiga)

Cada grabación la lee su propio hilo y la analiza su propia ejecución.
Los resultados salen como JSON en el orden de entrada.

Uso:
    ./target/release/posecoach sesion1.csv sesion2.csv --fps 30 --pretty
    ./target/release/posecoach --list-exercises
    ./target/release/posecoach --print-default-config > posecoach.json

Los logs van a stderr; RUST_LOG=debug muestra cada repetición y cada problema.
*/

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, unbounded};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use posecoach::csv_loader::load_frames_from_csv;
use posecoach::types::DEFAULT_FPS;
use posecoach::{AnalysisConfig, AnalysisError, Analyzer, LandmarkFrame, RunMetadata};

/// Frames en cola entre un hilo lector y su ejecución
const FRAME_QUEUE: usize = 100;

#[derive(Parser, Debug)]
#[command(
    name = "posecoach",
    version,
    about = "Identifica ejercicios, cuenta repeticiones y puntúa la técnica a partir de grabaciones de landmarks"
)]
struct Cli {
    /// Grabaciones de landmarks (frame,timestamp,joint,x,y,visibility)
    #[arg(value_name = "CSV")]
    recordings: Vec<PathBuf>,

    /// Configuración JSON (los campos ausentes toman el valor por defecto)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Frames por segundo del vídeo original
    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: f64,

    /// La grabación guarda uno de cada N frames del original
    #[arg(long, default_value_t = 1)]
    frame_step: u32,

    /// Frames totales del vídeo original, para la duración
    #[arg(long)]
    total_frames: Option<u64>,

    /// JSON indentado
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Muestra el catálogo de ejercicios y sale
    #[arg(long, default_value_t = false)]
    list_exercises: bool,

    /// Muestra la configuración por defecto en JSON y sale
    #[arg(long, default_value_t = false)]
    print_default_config: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_catalog(config: &AnalysisConfig) {
    for profile in &config.profiles {
        let supported = if config.is_supported(profile.exercise) {
            ""
        } else {
            " (desactivado)"
        };
        println!("{} [{}]{}", profile.info.display_name, profile.exercise, supported);
        println!("    {}", profile.info.description);
        println!("    músculos: {}", profile.info.muscle_groups.join(", "));
        println!("    dificultad: {}", profile.info.difficulty);
        match &profile.reps {
            Some(reps) => println!(
                "    repeticiones sobre {}: arriba {:.0}°, abajo {:.0}°",
                reps.primary, reps.top_angle, reps.bottom_angle
            ),
            None => println!("    posición estática, sin repeticiones"),
        }
    }
}

/// Entrada JSON de una grabación. Con datos insuficientes se informa un
/// ejercicio desconocido con cero repeticiones, nunca una etiqueta adivinada.
fn report_entry(path: &Path, outcome: Result<Value>) -> Value {
    match outcome {
        Ok(result) => json!({ "recording": path, "result": result }),
        Err(err) => {
            let insufficient = matches!(
                err.downcast_ref::<AnalysisError>(),
                Some(AnalysisError::InsufficientData(_))
            );
            if insufficient {
                json!({
                    "recording": path,
                    "error": err.to_string(),
                    "exercise_detected": "unknown",
                    "rep_count": 0,
                })
            } else {
                json!({ "recording": path, "error": format!("{:#}", err) })
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.print_default_config {
        println!("{}", serde_json::to_string_pretty(&AnalysisConfig::default())?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => AnalysisConfig::default(),
    };

    if cli.list_exercises {
        print_catalog(&config);
        return Ok(());
    }

    if cli.recordings.is_empty() {
        bail!("No se indicó ninguna grabación (ver --help)");
    }

    let analyzer = Analyzer::new(config)?;
    let metadata = RunMetadata {
        source_fps: cli.fps,
        frame_step: cli.frame_step,
        total_source_frames: cli.total_frames,
    };
    info!(
        version = posecoach::VERSION,
        recordings = cli.recordings.len(),
        fps = metadata.effective_fps(),
        "iniciando análisis"
    );

    let (tx_result, rx_result) = unbounded::<(usize, Result<Value>)>();

    for (slot, path) in cli.recordings.iter().enumerate() {
        let (tx_frames, rx_frames) = bounded::<LandmarkFrame>(FRAME_QUEUE);

        // Lector: CSV -> canal de frames
        let reader_path = path.clone();
        let reader = thread::spawn(move || -> Result<usize> {
            let frames = load_frames_from_csv(&reader_path)?;
            let total = frames.len();
            for frame in frames {
                if tx_frames.send(frame).is_err() {
                    break;
                }
            }
            Ok(total)
        });

        // Ejecución: canal de frames -> resultado
        let analyzer = analyzer.clone();
        let tx_result = tx_result.clone();
        thread::spawn(move || {
            let mut run = analyzer.start(metadata);
            while let Ok(frame) = rx_frames.recv() {
                run.push(frame);
            }

            let outcome = match reader.join() {
                Ok(Ok(_)) => run
                    .finish()
                    .map_err(anyhow::Error::from)
                    .and_then(|result| serde_json::to_value(result).map_err(anyhow::Error::from)),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(anyhow!("El hilo lector entró en pánico")),
            };
            let _ = tx_result.send((slot, outcome));
        });
    }
    drop(tx_result);

    let mut outcomes: Vec<Option<Result<Value>>> = cli.recordings.iter().map(|_| None).collect();
    for (slot, outcome) in rx_result.iter() {
        outcomes[slot] = Some(outcome);
    }

    let mut failures = 0;
    let mut entries = Vec::with_capacity(outcomes.len());
    for (path, outcome) in cli.recordings.iter().zip(outcomes) {
        let outcome = outcome.unwrap_or_else(|| Err(anyhow!("El hilo de análisis terminó sin resultado")));
        if let Err(err) = &outcome {
            error!(recording = ?path, "{:#}", err);
            failures += 1;
        }
        entries.push(report_entry(path, outcome));
    }

    let output = if entries.len() == 1 {
        entries.remove(0)
    } else {
        Value::Array(entries)
    };
    if cli.pretty {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }

    if failures > 0 {
        bail!("{} de {} grabaciones no se pudieron analizar", failures, cli.recordings.len());
    }
    Ok(())
}
