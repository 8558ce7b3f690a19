use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use posecoach::csv_loader::load_frames_from_csv;
use posecoach::feature_extractor::FeatureExtractor;
use posecoach::types::DEFAULT_FPS;
use posecoach::{AnalysisConfig, Analyzer, RunMetadata};

#[derive(Parser, Debug)]
#[command(name = "replay_csv", version, about = "Reproduce una grabación de landmarks a través del análisis")]
struct ReplayOptions {
    /// Grabación de landmarks a reproducir
    #[arg(value_name = "CSV")]
    csv_path: PathBuf,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: f64,

    #[arg(long, default_value_t = 1)]
    frame_step: u32,

    /// Muestra las features válidas de cada frame
    #[arg(long, default_value_t = false)]
    dump_features: bool,

    /// Muestra los cambios de fase y cada repetición completada
    #[arg(long, default_value_t = false)]
    dump_reps: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let opts = ReplayOptions::parse();
    println!("🎞️  Reproduciendo sesión desde {:?}", opts.csv_path);

    let config = match &opts.config {
        Some(path) => AnalysisConfig::load(path).with_context(|| format!("No se pudo cargar {:?}", path))?,
        None => AnalysisConfig::default(),
    };
    let metadata = RunMetadata {
        source_fps: opts.fps,
        frame_step: opts.frame_step,
        total_source_frames: None,
    };

    let frames = load_frames_from_csv(&opts.csv_path)?;
    println!("ℹ️  {} frames cargados", frames.len());

    if opts.dump_features {
        let extractor = FeatureExtractor::new(config.extractor_params(&metadata));
        println!("\n📊 Features por frame:");
        for (i, frame) in frames.iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| &frames[p]);
            let features = extractor.extract(frame, previous);
            let valid: Vec<String> = features
                .iter()
                .filter_map(|(feature, value)| value.map(|v| format!("{}={:.2}", feature, v)))
                .collect();
            println!("  {:05} t={:>8.3}  {}", frame.index, frame.timestamp, valid.join(" "));
        }
    }

    let analyzer = Analyzer::new(config)?;
    let mut run = analyzer.start(metadata);
    if opts.dump_reps {
        println!("\n🔄 Fases:");
    }
    let mut last_phase = None;
    for frame in frames {
        let index = frame.index;
        if !run.push(frame) {
            println!("  {:05} ⏪ timestamp hacia atrás, descartado", index);
            continue;
        }
        if !opts.dump_reps {
            continue;
        }
        if let Some(state) = run.rep_state() {
            if last_phase != Some(state.phase) {
                println!(
                    "  {:05} {:?} (ángulo {}, {} reps)",
                    index,
                    state.phase,
                    state.extremum.map_or("-".to_string(), |a| format!("{:.1}°", a)),
                    state.count
                );
                last_phase = Some(state.phase);
            }
        }
    }
    let result = run.finish()?;

    println!(
        "\n🥇 {} ({:.1}% de confianza)",
        result.exercise_detected,
        result.confidence * 100.0
    );
    println!(
        "🔁 {} reps, puntuación {} ({})",
        result.rep_count,
        result.overall_score,
        result.performance_level.label()
    );
    println!(
        "⏱️  {:.1}s, {} frames ({} útiles, {} descartados)",
        result.video_duration, result.frames_analyzed, result.valid_frames, result.frames_rejected
    );
    let session = &result.session;
    println!(
        "📈 {:.1} reps/min ({:?}), tendencia {:?}{}{}",
        session.rep_rate,
        session.pace,
        session.form_trend,
        if session.fatigue_detected { ", fatiga" } else { "" },
        if session.rest_recommended { ", toca descansar" } else { "" }
    );

    if !result.issues_detected.is_empty() {
        println!("\nProblemas:");
        for issue in &result.issues_detected {
            println!("  ⚠️  {}", issue);
        }
        for rec in &result.recommendations {
            println!("  💡 {}", rec);
        }
    }

    if !result.key_frames.is_empty() {
        println!("\nFrames clave:");
        for kf in &result.key_frames {
            println!("  frame {:>5}  puntuación {:>3}  {}", kf.frame, kf.score, kf.issues.join("; "));
        }
    }

    if opts.dump_reps {
        println!("\nRepeticiones:");
        for rep in &result.reps {
            println!(
                "  {:>3}. frames {:>5}-{:<5} profundidad {:>6.1}°  {:.2}s  {:>3}{}",
                rep.number,
                rep.start_frame,
                rep.end_frame,
                rep.depth,
                rep.duration_seconds,
                rep.score,
                if rep.form_violated { "  ⚠️" } else { "" }
            );
        }
    }

    Ok(())
}
