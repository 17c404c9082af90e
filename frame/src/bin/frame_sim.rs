//! Headless frame loop simulation.
//!
//! Runs the frame driver against the validating dummy backend and reports
//! per-frame statistics plus every synchronization or ownership violation
//! the backend observed.

use clap::{Parser, ValueEnum};

use redlilium_frame::{
    CullingMethod, DebugView, DummyBackend, Extent2d, FrameConfig, FrameDriver, FrameOutcome,
    GeometryPart, LightRecord, QueueTopology, RendererSettings, SceneInput, SurfaceEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliCulling {
    None,
    Tiled,
    Clustered,
}

impl From<CliCulling> for CullingMethod {
    fn from(value: CliCulling) -> Self {
        match value {
            CliCulling::None => CullingMethod::None,
            CliCulling::Tiled => CullingMethod::Tiled,
            CliCulling::Clustered => CullingMethod::Clustered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliDebugView {
    Disabled,
    Albedo,
    Normal,
    Specular,
    Position,
    Depth,
}

impl From<CliDebugView> for DebugView {
    fn from(value: CliDebugView) -> Self {
        match value {
            CliDebugView::Disabled => DebugView::Disabled,
            CliDebugView::Albedo => DebugView::Albedo,
            CliDebugView::Normal => DebugView::Normal,
            CliDebugView::Specular => DebugView::Specular,
            CliDebugView::Position => DebugView::Position,
            CliDebugView::Depth => DebugView::Depth,
        }
    }
}

/// RedLilium frame core simulation.
#[derive(Parser, Debug)]
#[command(
    name = "frame-sim",
    about = "Run the RedLilium frame loop against the dummy backend",
    long_about = "Runs N frames of the clustered/tiled deferred frame core without a GPU.\n\n\
        The dummy backend executes the light sort and BVH passes on the CPU and\n\
        validates sync points and queue ownership transfers.\n\n\
        EXAMPLES:\n\
          # 100 clustered frames with 10000 lights\n\
          ./frame-sim --frames 100 --lights 10000\n\
        \n\
          # Switch to tiled culling halfway and minimize the window at frame 20\n\
          ./frame-sim --switch-to tiled --resize-at 20",
    version
)]
struct Args {
    /// Number of frames to run.
    #[arg(long, default_value = "60")]
    frames: u64,

    /// Culling method.
    #[arg(long, default_value = "clustered", value_enum)]
    culling: CliCulling,

    /// Switch to this culling method after half the frames.
    #[arg(long, value_enum)]
    switch_to: Option<CliCulling>,

    /// Number of lights.
    #[arg(long, default_value = "1024")]
    lights: u32,

    /// Tile size in pixels.
    #[arg(long, default_value = "32")]
    tile_size: u32,

    /// G-buffer debug view.
    #[arg(long, default_value = "disabled", value_enum)]
    debug_view: CliDebugView,

    /// Surface width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Surface height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Minimize the window before this frame, restoring it at half size.
    #[arg(long)]
    resize_at: Option<u64>,

    /// Run both domains on the general queue.
    #[arg(long)]
    general_only: bool,

    /// Frames recorded ahead of the GPU.
    #[arg(long, default_value = "2")]
    frames_in_flight: u32,

    /// Disable vertical sync.
    #[arg(long)]
    no_vsync: bool,
}

/// Lights on a jittered lattice, deterministic for a given count.
fn generate_lights(count: u32) -> Vec<LightRecord> {
    let mut state = 0x2545_f491_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state as f32 / u32::MAX as f32) * 2.0 - 1.0
    };
    (0..count)
        .map(|_| {
            let position = [next() * 50.0, next() * 10.0 + 10.0, next() * 30.0];
            let intensity = [next().abs(), next().abs(), next().abs()];
            LightRecord::new(position, 2.0 + next().abs() * 4.0, intensity)
        })
        .collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    redlilium_frame::init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("Simulation failed: {}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), redlilium_frame::FrameError> {
    let extent = Extent2d::new(args.width, args.height);
    let backend = DummyBackend::new(extent);
    let handle = backend.handle();

    let settings = RendererSettings::default()
        .with_frames_in_flight(args.frames_in_flight)
        .with_topology(if args.general_only {
            QueueTopology::GeneralOnly
        } else {
            QueueTopology::GeneralAndAsync
        });
    let mut config = FrameConfig::default()
        .with_culling(args.culling.into())
        .with_tile_size(args.tile_size)
        .with_light_count(args.lights)
        .with_debug_view(args.debug_view.into())
        .with_vsync(!args.no_vsync);

    let scene = SceneInput {
        parts: vec![GeometryPart {
            vertex_range: 0..24,
            index_range: 0..36,
            ..Default::default()
        }],
        world_scale: 1.0,
        lights: generate_lights(args.lights),
        overlay_draws: 1,
        ..Default::default()
    };

    let mut driver = FrameDriver::new(backend, settings, config)?;
    for frame in 0..args.frames {
        if let Some(method) = args.switch_to
            && frame == args.frames / 2
        {
            log::info!("Switching culling method to {}", CullingMethod::from(method));
            config = config.with_culling(method.into());
        }
        if args.resize_at == Some(frame) {
            handle.push_event(SurfaceEvent::Resize(Extent2d::new(0, 0)));
            handle.push_event(SurfaceEvent::Resize(Extent2d::new(
                (args.width / 2).max(1),
                (args.height / 2).max(1),
            )));
        }

        match driver.run_frame(&config, &scene)? {
            FrameOutcome::Presented { image, slot } => {
                log::debug!("Frame {}: presented image {} (slot {})", frame, image, slot)
            }
            FrameOutcome::Dropped => log::info!("Frame {}: dropped", frame),
        }
    }
    driver.wait_idle()?;

    let stats = driver.stats();
    let report = handle.report();
    log::info!(
        "{} frames presented, {} dropped, {} recreations, {} graph rebuilds",
        stats.frames_presented,
        stats.frames_dropped,
        stats.recreations,
        stats.graph_rebuilds
    );
    log::info!(
        "{} submissions, {} ownership transfers matched",
        report.submissions.len(),
        report.matched_transfers
    );
    if report.is_clean() {
        log::info!("No validation errors");
        Ok(())
    } else {
        for violation in &report.violations {
            log::error!("{}", violation);
        }
        Err(redlilium_frame::FrameError::Internal(format!(
            "{} validation errors",
            report.violations.len()
        )))
    }
}
