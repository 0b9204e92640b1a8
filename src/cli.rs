use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::backend::HeadlessBackend;
use crate::config::RuntimeConfig;
use crate::frame_driver::{FrameScheduler, ManualScheduler, TickOutcome};
use crate::generation::{FilePayloadSource, GENERATION_FAILED_MESSAGE};
use crate::gpu::backends::OffscreenBackend;
use crate::loader::InstallReport;
use crate::params::ParamValue;
use crate::payload::parse_payload_or_bundle;
use crate::resources::ResourceCounts;
use crate::script_diagnostics::ScriptDiagnostic;
use crate::surface::{Dimensions, HostSurface};
use crate::visualiser::Visualiser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runtime configuration (JSON). Missing fields use built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which content to install. With neither flag the idle background is shown.
#[derive(Args, Debug, Clone, Default)]
struct ContentArgs {
    /// Payload or shared-bundle JSON file
    #[arg(long, conflicts_with = "topic")]
    payload: Option<PathBuf>,

    /// Topic to look up in --source
    #[arg(long, requires = "source")]
    topic: Option<String>,

    /// Directory (or single file) of previously generated payloads
    #[arg(long)]
    source: Option<PathBuf>,

    /// Override a control value, e.g. `--param speed=2.5` or `--param trails=false`
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, ParamValue)>,

    /// Seed for the idle generator
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render frames to PNG files offscreen
    Render {
        #[command(flatten)]
        content: ContentArgs,

        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Number of frames to write
        #[arg(long, default_value_t = 1)]
        frames: u32,

        /// Frames per second of the simulated clock
        #[arg(long, default_value_t = 60.0)]
        fps: f64,

        #[arg(long, default_value_t = 800)]
        width: u32,

        #[arg(long, default_value_t = 600)]
        height: u32,
    },
    /// Install content headlessly, run frames and print the report as JSON
    Check {
        #[command(flatten)]
        content: ContentArgs,

        #[arg(long, default_value_t = 60)]
        frames: u32,

        #[arg(long, default_value_t = 60.0)]
        fps: f64,

        /// Exit with an error if any script diagnostic was reported
        #[arg(long)]
        strict: bool,
    },
    /// Open an interactive window
    View {
        #[command(flatten)]
        content: ContentArgs,

        #[arg(long, default_value_t = 1280)]
        width: u32,

        #[arg(long, default_value_t = 720)]
        height: u32,

        /// Directory screenshots are written to
        #[arg(long, default_value = "screenshots")]
        screenshots: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Render {
            content,
            out,
            frames,
            fps,
            width,
            height,
        } => render_offline(config, &content, &out, frames, fps, width, height),
        Commands::Check {
            content,
            frames,
            fps,
            strict,
        } => check(config, &content, frames, fps, strict),
        Commands::View {
            content,
            width,
            height,
            screenshots,
        } => crate::viewer::run(config, content.into_selection(), width, height, screenshots),
    }
}

/// `name=value`, where value is `true`, `false` or a number.
fn parse_param(arg: &str) -> Result<(String, ParamValue), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing control id in '{}'", arg));
    }
    let value = match value.trim() {
        "true" => ParamValue::Bool(true),
        "false" => ParamValue::Bool(false),
        other => ParamValue::Number(
            other
                .parse::<f32>()
                .map_err(|_| format!("'{}' is not a number or boolean", other))?,
        ),
    };
    Ok((name.to_string(), value))
}

/// Content resolved from the command line, handed to the interactive viewer.
#[derive(Debug, Clone, Default)]
pub struct ContentSelection {
    pub payload: Option<PathBuf>,
    pub topic: Option<(String, PathBuf)>,
    pub params: Vec<(String, ParamValue)>,
    pub seed: Option<u64>,
}

impl ContentArgs {
    fn into_selection(self) -> ContentSelection {
        ContentSelection {
            payload: self.payload,
            topic: self.topic.zip(self.source),
            params: self.params,
            seed: self.seed,
        }
    }
}

/// Build a visualiser on `surface` and install the selected content.
pub fn mount<S: FrameScheduler>(
    config: RuntimeConfig,
    selection: &ContentSelection,
    surface: HostSurface,
    backend: Box<dyn crate::backend::RenderBackend>,
    scheduler: S,
) -> Result<Visualiser<S>> {
    let mut visualiser = match selection.seed {
        Some(seed) => Visualiser::with_seed(surface, backend, scheduler, config, seed),
        None => Visualiser::new(surface, backend, scheduler, config),
    };

    if let Some(path) = &selection.payload {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let bundle = parse_payload_or_bundle(&json)
            .with_context(|| format!("{} is not a payload or bundle", path.display()))?;
        log::info!("Installing '{}'", bundle.payload.title);
        visualiser.activate_bundle(bundle)?;
    } else if let Some((topic, source)) = &selection.topic {
        let mut source = FilePayloadSource::new(source);
        if let Err(e) = visualiser.generate(&mut source, topic) {
            log::error!("{}", e);
            bail!(GENERATION_FAILED_MESSAGE);
        }
    }

    for (id, value) in &selection.params {
        if !visualiser.set_parameter(id, *value) {
            log::warn!("--param {}: no such control", id);
        }
    }
    Ok(visualiser)
}

/// Tick the next due frame, or draw directly once the loop has stopped.
fn step(visualiser: &mut Visualiser<ManualScheduler>, timestamp: f64) -> TickOutcome {
    match visualiser.scheduler_mut().next_due() {
        Some(request) => visualiser.on_frame(request, timestamp),
        None => match visualiser.context_mut().render() {
            Ok(()) => TickOutcome::Rendered,
            Err(e) => {
                log::warn!("Frame render failed: {}", e);
                TickOutcome::RenderFailed
            }
        },
    }
}

fn render_offline(
    config: RuntimeConfig,
    content: &ContentArgs,
    out_dir: &Path,
    frames: u32,
    fps: f64,
    width: u32,
    height: u32,
) -> Result<()> {
    if fps <= 0.0 {
        bail!("--fps must be positive");
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let backend = OffscreenBackend::new(width, height)?;
    let captures = backend.captures();
    let surface = HostSurface::new(Dimensions::new(width, height));
    let mut visualiser = mount(
        config,
        &content.clone().into_selection(),
        surface,
        Box::new(backend),
        ManualScheduler::new(),
    )?;

    println!("Rendering {} frames to {:?}...", frames, out_dir);
    for i in 0..frames {
        captures.request(out_dir.join(format!("frame_{:05}.png", i)));
        step(&mut visualiser, i as f64 / fps);
    }
    visualiser.unmount();

    if captures.failed() > 0 {
        bail!("{} of {} frames could not be written", captures.failed(), frames);
    }
    println!("Done, {} frames written.", captures.saved().len());
    Ok(())
}

#[derive(Serialize)]
struct CheckReport<'a> {
    install: Option<&'a InstallReport>,
    frames_requested: u32,
    frames_rendered: u64,
    halted: Option<&'a ScriptDiagnostic>,
    live_resources: ResourceCounts,
}

fn check(
    config: RuntimeConfig,
    content: &ContentArgs,
    frames: u32,
    fps: f64,
    strict: bool,
) -> Result<()> {
    if fps <= 0.0 {
        bail!("--fps must be positive");
    }
    let surface = HostSurface::new(Dimensions::new(800, 600));
    let backend = HeadlessBackend::new(800, 600);
    let log = backend.log();
    let mut visualiser = mount(
        config,
        &content.clone().into_selection(),
        surface,
        Box::new(backend),
        ManualScheduler::new(),
    )?;

    for i in 0..frames {
        if visualiser.scheduler_mut().pending_count() == 0 {
            break;
        }
        step(&mut visualiser, i as f64 / fps);
    }

    let live_resources = visualiser.context().stage().resources.borrow().live_counts();
    let report = CheckReport {
        install: visualiser.last_report(),
        frames_requested: frames,
        frames_rendered: log.borrow().frames,
        halted: visualiser.halted(),
        live_resources,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    let failed = visualiser.halted().is_some()
        || visualiser
            .last_report()
            .is_some_and(|report| !report.is_clean());
    visualiser.unmount();
    if strict && failed {
        bail!("payload reported script errors");
    }
    Ok(())
}
