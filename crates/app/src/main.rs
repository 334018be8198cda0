use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use clap::{Parser, Subcommand};
use lightshow_core::{
    AudioInput, AudioLevelVisualizer, ColorPalette, ConfigHandle, FrameSink, Input,
    KnobDimmerVisualizer, LedStripOutput, MidiInput, Operator, Output, Result,
    ScriptedBackend, SharedPalette, ShowConfig, SolidColorVisualizer, Visualizer,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, seconds } => run(config.as_deref(), seconds),
        Commands::InitConfig { path } => init_config(&path),
    }
}

fn run(config_path: Option<&std::path::Path>, seconds: u64) -> Result<()> {
    let config = match config_path {
        Some(path) => ShowConfig::load(path)?,
        None => ShowConfig::default(),
    };
    let config = ConfigHandle::new(config);
    config.set_output_enabled(STRIP_NAME, true);

    let palette = Arc::new(SharedPalette::new());
    palette.set_gradient_color(0, 0xFF4400, 0x0044FF);

    let (script, backend) = ScriptedBackend::new();
    let midi = Arc::new(MidiInput::new(
        config.clone(),
        Arc::new(backend),
        palette.clone() as Arc<dyn ColorPalette>,
    ));
    let audio = Arc::new(AudioInput::new(config.clone()));

    let strip = Arc::new(LedStripOutput::new(
        STRIP_NAME,
        60,
        Arc::new(ConsoleSink::default()) as Arc<dyn FrameSink>,
        config.clone(),
    ));

    let backdrop = Arc::new(SolidColorVisualizer::new(
        strip.clone(),
        palette.clone(),
        0,
        0x101010,
    ));
    let meter = Arc::new(AudioLevelVisualizer::new(
        audio.clone(),
        strip.clone(),
        0x00FF88,
        2,
    ));
    let dimmer = Arc::new(KnobDimmerVisualizer::new(
        midi.clone(),
        strip.clone(),
        2,
        0xFFFFFF,
        3,
    ));
    strip.register_visualizer(backdrop.clone() as Arc<dyn Visualizer>);
    strip.register_visualizer(meter.clone() as Arc<dyn Visualizer>);
    strip.register_visualizer(dimmer.clone() as Arc<dyn Visualizer>);

    let operator = Operator::new(
        config.clone(),
        vec![
            audio.clone() as Arc<dyn Input>,
            midi.clone() as Arc<dyn Input>,
        ],
        vec![strip.clone() as Arc<dyn Output>],
        vec![
            backdrop as Arc<dyn Visualizer>,
            meter as Arc<dyn Visualizer>,
            dimmer as Arc<dyn Visualizer>,
        ],
    );

    tracing::info!(seconds, "starting show");
    operator.set_enabled(true);

    // Demo stand-ins for live capture: a synthesized tone on the audio path
    // and a slow knob sweep on the scripted MIDI device.
    let audio_config = config.audio();
    let feeder = {
        let audio = audio.clone();
        thread::spawn(move || {
            let block = audio_config.block_size;
            let rate = audio_config.sample_rate as f32;
            let block_duration =
                Duration::from_secs_f32(block as f32 / rate.max(1.0));
            let blocks = seconds * audio_config.sample_rate as u64 / block.max(1) as u64;
            let mut phase: f32 = 0.0;
            for _ in 0..blocks {
                let samples: Vec<f32> = (0..block)
                    .map(|i| {
                        let t = phase + i as f32;
                        (2.0 * std::f32::consts::PI * 220.0 * t / rate).sin() * 0.5
                    })
                    .collect();
                phase += block as f32;
                if let Err(err) = audio.push_samples(&samples) {
                    tracing::warn!(%err, "audio feed failed");
                    break;
                }
                thread::sleep(block_duration);
            }
        })
    };

    for second in 0..seconds {
        thread::sleep(Duration::from_secs(1));
        // Sweep knob 2 from 0 to 127 over the run.
        let position = (second * 127 / seconds.max(1)) as u8;
        let _ = script.send(lightshow_core::RawChannelMessage {
            command: lightshow_core::ChannelCommand::Controller,
            data1: 2,
            data2: position,
        });
        tracing::info!(fps = config.operator_fps(), "operator running");
    }

    if feeder.join().is_err() {
        tracing::warn!("audio feeder thread panicked");
    }
    operator.set_enabled(false);
    tracing::info!("show stopped");
    Ok(())
}

fn init_config(path: &PathBuf) -> Result<()> {
    let mut config = ShowConfig::default();
    config.outputs.insert(STRIP_NAME.to_string(), true);
    config.save(path)?;
    tracing::info!(?path, "wrote default configuration");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

const STRIP_NAME: &str = "strip";

/// Sink that reports frame activity instead of talking to hardware.
#[derive(Default)]
struct ConsoleSink {
    frames: std::sync::atomic::AtomicUsize,
}

impl FrameSink for ConsoleSink {
    fn write_frame(&self, pixels: &[u32]) -> Result<()> {
        let count = self
            .frames
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if count % 500 == 0 {
            let lit = pixels.iter().filter(|&&pixel| pixel != 0).count();
            tracing::debug!(frame = count, lit, total = pixels.len(), "frame flushed");
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Live LED installation operator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the show for a bounded duration with demo inputs.
    Run {
        /// Optional JSON configuration file to load on startup.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How long to run before shutting the operator down.
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
    /// Write a default configuration file.
    InitConfig {
        /// Output path for the generated configuration.
        path: PathBuf,
    },
}
