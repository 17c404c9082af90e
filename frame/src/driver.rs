//! Frame loop driver.
//!
//! [`FrameDriver`] runs one frame per [`run_frame`](FrameDriver::run_frame)
//! call through a fixed sequence of states:
//!
//! ```text
//! AcquireImage ─► SubmitGBuffer ─► SubmitCullingGraph ─► SubmitComposition ─► Present
//!      │                                                                        │
//!      └──────────────── out of date ─► Recreate ◄──────── out of date ─────────┘
//! ```
//!
//! `Recreate` blocks while the surface has zero area, idles every queue and
//! rebuilds everything that depends on the surface size: the swapchain, the
//! frame resources, the stage graph and its programs. The interrupted frame
//! is dropped. Every other error is fatal and returned to the caller.
//!
//! Switching the culling method or tile size, and shader reloads, take the
//! same drain-and-rebuild path without touching the swapchain.

use crate::backend::FrameBackend;
use crate::cluster::TileGrid;
use crate::config::{CullingMethod, FrameConfig, RendererSettings};
use crate::domain::{DomainMap, ExecutionDomain, QueueTopology};
use crate::double_buffer::DoubleBuffer;
use crate::error::FrameError;
use crate::graph::{FramePhase, FrameStageGraph, StageId};
use crate::ownership::OwnershipTracker;
use crate::pipeline::FramePipeline;
use crate::program::ProgramRegistry;
use crate::recorder::FrameRecorder;
use crate::resource::Extent2d;
use crate::resources::FrameResources;
use crate::scene::SceneInput;
use crate::scheduler::{FrameSchedule, FrameSlot, SyncPointKey, SyncPointPool};

/// State of the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Waiting for a swapchain image.
    AcquireImage,
    /// Submitting the G-buffer phase.
    SubmitGBuffer,
    /// Submitting the culling stages of the active method.
    SubmitCullingGraph,
    /// Submitting composition.
    SubmitComposition,
    /// Presenting the composed image.
    Present,
    /// Recreating the swapchain and every size-dependent object.
    Recreate,
}

impl DriverState {
    fn submitting(phase: FramePhase) -> Self {
        match phase {
            FramePhase::GBuffer => Self::SubmitGBuffer,
            FramePhase::Culling => Self::SubmitCullingGraph,
            FramePhase::Composition => Self::SubmitComposition,
        }
    }
}

/// Result of one [`FrameDriver::run_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was presented.
    Presented {
        /// Swapchain image the frame rendered into.
        image: u32,
        /// Frame slot the frame used.
        slot: FrameSlot,
    },
    /// The surface went out of date; the frame was dropped and the swapchain
    /// recreated.
    Dropped,
}

/// Frame loop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Frames presented.
    pub frames_presented: u64,
    /// Frames dropped by swapchain recreation.
    pub frames_dropped: u64,
    /// Swapchain recreations (resize, out of date, present mode change).
    pub recreations: u64,
    /// Stage graph rebuilds (mode switch, tile size change, shader reload).
    pub graph_rebuilds: u64,
}

/// Drives frames through a [`FrameBackend`].
///
/// ```ignore
/// let mut driver = FrameDriver::new(backend, RendererSettings::default(), config)?;
/// loop {
///     match driver.run_frame(&config, &scene)? {
///         FrameOutcome::Presented { .. } => {}
///         FrameOutcome::Dropped => log::debug!("frame dropped"),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    settings: RendererSettings,
    config: FrameConfig,
    extent: Extent2d,
    image_count: u32,
    graph: FrameStageGraph,
    resources: FrameResources,
    programs: ProgramRegistry,
    pipeline: FramePipeline,
    pool: SyncPointPool,
    ownership: OwnershipTracker,
    double_buffer: DoubleBuffer,
    state: DriverState,
    reload_requested: bool,
    stats: FrameStats,
}

/// Graph, resources and programs for a method and surface size.
fn build_frame_objects<B: FrameBackend>(
    backend: &mut B,
    settings: &RendererSettings,
    config: &FrameConfig,
    extent: Extent2d,
) -> Result<(FrameStageGraph, FrameResources, ProgramRegistry), FrameError> {
    let graph = FrameStageGraph::build(config.culling)?;
    if config.culling == CullingMethod::Clustered {
        settings.cluster_grid(TileGrid::new(extent, config.tile_size))?;
    }
    let resources = FrameResources::build(settings, config, extent);
    backend.create_resources(resources.arena())?;
    let programs = ProgramRegistry::build(&graph.programs(), |id, bindings| {
        backend.create_program(id, bindings)
    })?;
    log::debug!(
        "Built {} frame: {} stages, {} resources ({} bytes), {} programs",
        config.culling,
        graph.stage_count(),
        resources.arena().len(),
        resources.arena().total_bytes(),
        programs.len()
    );
    Ok((graph, resources, programs))
}

impl<B: FrameBackend> FrameDriver<B> {
    /// Create the swapchain and every frame object.
    ///
    /// Blocks while the surface has zero area.
    pub fn new(
        mut backend: B,
        settings: RendererSettings,
        config: FrameConfig,
    ) -> Result<Self, FrameError> {
        settings.validate()?;
        config.validate()?;

        let mut domains = backend.domain_map();
        if settings.topology == QueueTopology::GeneralOnly
            && domains.topology() != QueueTopology::GeneralOnly
        {
            domains = DomainMap::general_only(domains.queue(ExecutionDomain::Primary));
        }
        log::info!(
            "Frame driver on {} ({:?}, {} frames in flight)",
            backend.name(),
            domains.topology(),
            settings.frames_in_flight
        );

        let mut extent = backend.surface_extent();
        while extent.is_zero_area() {
            extent = backend.wait_surface_events();
        }
        let swapchain = backend.recreate_swapchain(extent, config.present_mode())?;
        let (graph, resources, programs) =
            build_frame_objects(&mut backend, &settings, &config, swapchain.extent)?;

        let double_buffer = DoubleBuffer::new();
        let mut ownership = OwnershipTracker::new(domains);
        resources.seed(&mut ownership, &double_buffer);

        Ok(Self {
            backend,
            settings,
            config,
            extent: swapchain.extent,
            image_count: swapchain.image_count,
            graph,
            resources,
            programs,
            pipeline: FramePipeline::new(settings.frames_in_flight),
            pool: SyncPointPool::new(settings.frames_in_flight, swapchain.image_count),
            ownership,
            double_buffer,
            state: DriverState::AcquireImage,
            reload_requested: false,
            stats: FrameStats::default(),
        })
    }

    /// Run one frame with the given configuration snapshot.
    ///
    /// Returns [`FrameOutcome::Dropped`] when the surface went out of date
    /// and the swapchain was recreated. Fatal errors are returned.
    pub fn run_frame(
        &mut self,
        config: &FrameConfig,
        scene: &SceneInput,
    ) -> Result<FrameOutcome, FrameError> {
        config.validate()?;
        self.apply_config(config)?;

        if self.backend.surface_extent().is_zero_area() {
            return self.drop_frame();
        }

        match self.try_frame(scene) {
            Ok(outcome) => {
                self.state = DriverState::AcquireImage;
                Ok(outcome)
            }
            Err(err) if err.is_recoverable() => {
                log::info!("Surface out of date ({}), recreating", err);
                self.drop_frame()
            }
            Err(err) => {
                log::error!("Frame failed in {:?}: {}", self.state, err);
                Err(err)
            }
        }
    }

    /// Rebuild programs and frame objects before the next frame.
    pub fn request_reload(&mut self) {
        log::info!("Shader reload requested");
        self.reload_requested = true;
    }

    /// Wait for all GPU work. Call before dropping the driver.
    pub fn wait_idle(&mut self) -> Result<(), FrameError> {
        self.pipeline.wait_idle();
        self.backend.wait_idle()
    }

    /// Current loop state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Frame counters.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Active stage graph.
    pub fn graph(&self) -> &FrameStageGraph {
        &self.graph
    }

    /// Active frame resources.
    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    /// Configuration of the last frame.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Swapchain extent.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Sort double-buffer selector.
    pub fn double_buffer(&self) -> &DoubleBuffer {
        &self.double_buffer
    }

    /// Frames started, including dropped ones.
    pub fn frame_count(&self) -> u64 {
        self.pipeline.frame_count()
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn apply_config(&mut self, next: &FrameConfig) -> Result<(), FrameError> {
        let rebuild = self.config.requires_rebuild(next) || self.reload_requested;
        let recreate = self.config.requires_swapchain_recreate(next);
        self.config = *next;
        if !rebuild && !recreate {
            return Ok(());
        }

        log::debug!(
            "Configuration change: rebuild={}, recreate swapchain={}",
            rebuild,
            recreate
        );
        self.wait_idle()?;
        if recreate {
            let swapchain = self
                .backend
                .recreate_swapchain(self.extent, self.config.present_mode())?;
            self.extent = swapchain.extent;
            self.image_count = swapchain.image_count;
            self.stats.recreations += 1;
        }
        self.rebuild()?;
        if rebuild {
            self.stats.graph_rebuilds += 1;
        }
        self.reload_requested = false;
        Ok(())
    }

    /// Rebuild every frame object. The device must be idle.
    fn rebuild(&mut self) -> Result<(), FrameError> {
        let (graph, resources, programs) =
            build_frame_objects(&mut self.backend, &self.settings, &self.config, self.extent)?;
        self.graph = graph;
        self.resources = resources;
        self.programs = programs;
        self.ownership.reset();
        self.double_buffer = DoubleBuffer::new();
        self.resources.seed(&mut self.ownership, &self.double_buffer);
        self.pool = SyncPointPool::new(self.settings.frames_in_flight, self.image_count);
        Ok(())
    }

    fn drop_frame(&mut self) -> Result<FrameOutcome, FrameError> {
        self.recreate()?;
        self.stats.frames_dropped += 1;
        Ok(FrameOutcome::Dropped)
    }

    fn recreate(&mut self) -> Result<(), FrameError> {
        self.state = DriverState::Recreate;

        let mut extent = self.backend.surface_extent();
        while extent.is_zero_area() {
            log::debug!("Surface has zero area, waiting for events");
            extent = self.backend.wait_surface_events();
        }

        self.wait_idle()?;
        let swapchain = self
            .backend
            .recreate_swapchain(extent, self.config.present_mode())?;
        self.extent = swapchain.extent;
        self.image_count = swapchain.image_count;
        self.rebuild()?;
        self.stats.recreations += 1;
        self.state = DriverState::AcquireImage;

        log::info!(
            "Swapchain recreated at {}x{} with {} images",
            self.extent.width,
            self.extent.height,
            self.image_count
        );
        Ok(())
    }

    fn try_frame(&mut self, scene: &SceneInput) -> Result<FrameOutcome, FrameError> {
        crate::profile_scope!("run_frame");

        self.state = DriverState::AcquireImage;
        let slot = self.pipeline.begin_frame();
        self.pool.reset_slot(slot);
        self.ownership.retire_slot(slot);

        let image_available = self.pool.signal(SyncPointKey::ImageAvailable, slot, 0);
        let image = match self.backend.acquire_image(image_available) {
            Ok(image) => image,
            Err(err) => {
                self.pipeline.abandon_frame();
                return Err(err);
            }
        };
        self.pool.reset_image(image);

        let staging = self.resources.staging(slot);
        self.ownership.host_write(staging);
        let lights = scene.active_lights(self.config.light_count);
        self.backend
            .write_staging(staging, bytemuck::cast_slice(lights))?;

        let recorder = FrameRecorder {
            graph: &self.graph,
            resources: &self.resources,
            programs: &self.programs,
            settings: &self.settings,
            config: &self.config,
            scene,
            slot,
            image,
        };
        let mut streams = recorder.record(&mut self.ownership, &mut self.double_buffer);

        let mut schedule = FrameSchedule::new(slot, image);
        for phase in FramePhase::ALL {
            self.state = DriverState::submitting(phase);
            crate::profile_scope!("submit_phase");
            for stage in self.graph.phase_stages(phase) {
                let stream = streams.take(stage.id());
                if stage.id() == StageId::Composition {
                    schedule.present(&mut self.pool, stage, stream);
                } else {
                    schedule.submit(&mut self.pool, stage, stream);
                }
            }
            for submission in schedule.drain() {
                self.backend.submit(submission)?;
            }
        }

        self.state = DriverState::Present;
        self.pipeline.end_frame(schedule.take_fence());
        let render_finished = self.pool.wait(SyncPointKey::RenderFinished, slot, image);
        let presented = self.backend.present(image, render_finished);
        crate::frame_mark!();
        presented?;

        self.stats.frames_presented += 1;
        log::trace!(
            "Presented image {} (slot {}, {} stages)",
            image,
            slot,
            schedule.submitted_count()
        );
        Ok(FrameOutcome::Presented { image, slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyHandle, SurfaceEvent};
    use crate::domain::QueueRef;
    use crate::light::LightRecord;
    use crate::scene::GeometryPart;

    fn scene(light_count: u32) -> SceneInput {
        SceneInput {
            parts: vec![GeometryPart {
                index_range: 0..36,
                vertex_range: 0..24,
                ..Default::default()
            }],
            world_scale: 1.0,
            lights: (0..light_count)
                .map(|i| {
                    let f = i as f32;
                    LightRecord::new([f % 17.0, f % 5.0, f % 11.0], 1.5, [1.0; 3])
                })
                .collect(),
            ..Default::default()
        }
    }

    fn driver(config: FrameConfig) -> (FrameDriver<DummyBackend>, DummyHandle) {
        let backend = DummyBackend::new(Extent2d::new(256, 128));
        let handle = backend.handle();
        let driver = FrameDriver::new(backend, RendererSettings::default(), config).unwrap();
        (driver, handle)
    }

    fn clustered() -> FrameConfig {
        FrameConfig::default()
            .with_culling(CullingMethod::Clustered)
            .with_light_count(300)
    }

    #[test]
    fn test_presents_frames_cleanly() {
        let config = clustered();
        let (mut driver, handle) = driver(config);
        let scene = scene(300);

        for _ in 0..4 {
            let outcome = driver.run_frame(&config, &scene).unwrap();
            assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        }

        let report = handle.report();
        assert!(report.is_clean(), "{:#?}", report.violations);
        assert_eq!(report.presents.len(), 4);
        assert!(report.matched_transfers > 0);
        assert_eq!(driver.stats().frames_presented, 4);
        assert_eq!(driver.state(), DriverState::AcquireImage);
    }

    #[test]
    fn test_slots_alternate() {
        let config = clustered();
        let (mut driver, _) = driver(config);
        let scene = scene(16);
        let slots: Vec<u32> = (0..3)
            .map(|_| match driver.run_frame(&config, &scene).unwrap() {
                FrameOutcome::Presented { slot, .. } => slot.index(),
                FrameOutcome::Dropped => panic!("unexpected drop"),
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0]);
    }

    #[test]
    fn test_outdated_on_present_drops_frame() {
        let config = clustered();
        let (mut driver, handle) = driver(config);
        let scene = scene(64);
        handle.push_event(SurfaceEvent::OutdatedOnPresent);

        assert_eq!(
            driver.run_frame(&config, &scene).unwrap(),
            FrameOutcome::Dropped
        );
        assert!(matches!(
            driver.run_frame(&config, &scene).unwrap(),
            FrameOutcome::Presented { .. }
        ));

        let stats = driver.stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.recreations, 1);
        assert!(handle.report().is_clean());
    }

    #[test]
    fn test_mode_switch_rebuilds_graph() {
        let config = clustered();
        let (mut driver, handle) = driver(config);
        let scene = scene(128);
        driver.run_frame(&config, &scene).unwrap();

        let tiled = config.with_culling(CullingMethod::Tiled);
        driver.run_frame(&tiled, &scene).unwrap();

        assert_eq!(driver.graph().method(), CullingMethod::Tiled);
        assert_eq!(driver.stats().graph_rebuilds, 1);
        assert_eq!(driver.stats().recreations, 0);
        assert!(handle.report().is_clean());
    }

    #[test]
    fn test_light_count_change_does_not_rebuild() {
        let config = clustered();
        let (mut driver, _) = driver(config);
        let scene = scene(512);
        driver.run_frame(&config, &scene).unwrap();
        driver
            .run_frame(&config.with_light_count(512), &scene)
            .unwrap();
        assert_eq!(driver.stats().graph_rebuilds, 0);
    }

    #[test]
    fn test_vsync_change_recreates_swapchain() {
        let config = clustered();
        let (mut driver, handle) = driver(config);
        let scene = scene(8);
        driver.run_frame(&config, &scene).unwrap();
        driver.run_frame(&config.with_vsync(false), &scene).unwrap();

        assert_eq!(driver.stats().recreations, 1);
        assert_eq!(driver.stats().graph_rebuilds, 0);
        assert_eq!(handle.report().swapchain_recreations, 2);
    }

    #[test]
    fn test_request_reload() {
        let config = clustered();
        let (mut driver, _) = driver(config);
        let scene = scene(8);
        driver.request_reload();
        driver.run_frame(&config, &scene).unwrap();
        assert_eq!(driver.stats().graph_rebuilds, 1);
        driver.run_frame(&config, &scene).unwrap();
        assert_eq!(driver.stats().graph_rebuilds, 1);
    }

    #[test]
    fn test_zero_area_resize_waits_for_surface() {
        let config = clustered();
        let (mut driver, handle) = driver(config);
        let scene = scene(32);
        handle.push_event(SurfaceEvent::Resize(Extent2d::new(0, 0)));
        handle.push_event(SurfaceEvent::Resize(Extent2d::new(0, 0)));
        handle.push_event(SurfaceEvent::Resize(Extent2d::new(320, 200)));

        assert_eq!(
            driver.run_frame(&config, &scene).unwrap(),
            FrameOutcome::Dropped
        );
        assert_eq!(driver.extent(), Extent2d::new(320, 200));
        driver.run_frame(&config, &scene).unwrap();

        let report = handle.report();
        assert_eq!(report.surface_waits, 2);
        assert!(report.is_clean(), "{:#?}", report.violations);
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let config = clustered();
        let (mut driver, handle) = driver(config);
        handle.push_event(SurfaceEvent::DeviceLost);
        assert_eq!(
            driver.run_frame(&config, &scene(4)),
            Err(FrameError::DeviceLost)
        );
    }

    #[test]
    fn test_general_only_uses_memory_barriers() {
        let config = clustered();
        let backend = DummyBackend::new(Extent2d::new(128, 128))
            .with_domains(DomainMap::general_only(QueueRef::new(0, 0)));
        let handle = backend.handle();
        let mut driver =
            FrameDriver::new(backend, RendererSettings::default(), config).unwrap();
        let scene = scene(100);
        driver.run_frame(&config, &scene).unwrap();
        driver.run_frame(&config, &scene).unwrap();

        let report = handle.report();
        assert!(report.is_clean(), "{:#?}", report.violations);
        assert_eq!(report.matched_transfers, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = clustered();
        let (mut driver, _) = driver(config);
        let bad = config.with_light_count(crate::light::MAX_LIGHTS + 1);
        assert!(matches!(
            driver.run_frame(&bad, &scene(1)),
            Err(FrameError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_oversized_cluster_grid_rejected() {
        let backend = DummyBackend::new(Extent2d::new(16384, 16384));
        let settings = RendererSettings::default().with_depth_slices(1024);
        let config = clustered().with_tile_size(1);
        assert!(matches!(
            FrameDriver::new(backend, settings, config),
            Err(FrameError::InvalidConfig(_))
        ));
    }
}
