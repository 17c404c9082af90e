//! Dummy GPU backend for testing and development.
//!
//! The dummy backend performs no GPU work. It executes recorded streams on
//! the CPU where that is meaningful (fills, updates, copies, the light sort,
//! the BVH levels and the cluster page passes) and validates what a real
//! driver would not report:
//!
//! - every waited sync point was signaled earlier in submission order, and
//!   no sync point is signaled twice,
//! - every acquire barrier matches a release in a submission the acquirer
//!   waits on,
//! - every access comes from the domain owning the resource.
//!
//! Violations are collected in a [`ValidationReport`] instead of panicking,
//! so tests can assert on them. Surface behavior (outdated swapchains,
//! minimized windows, device loss) is scripted with [`SurfaceEvent`]s.
//!
//! The dummy has no rasterizer, so the cluster flag pass marks the clusters
//! set with [`DummyHandle::touch_clusters`] instead of reading depth.
//! Indirect dispatches read their workgroup counts from the argument buffer
//! and are listed in the report.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{FrameBackend, SwapchainInfo};
use crate::bvh::{self, BvhNode, BvhPush};
use crate::cluster::{self, ClusterCounters, ClusterPush};
use crate::command::{BarrierKind, Binding, BufferBarrier, Command, ResourceBinding};
use crate::config::PresentMode;
use crate::domain::{DomainMap, ExecutionDomain, QueueRef};
use crate::error::FrameError;
use crate::graph::StageId;
use crate::light::LightRecord;
use crate::program::{ProgramHandle, ProgramId};
use crate::resource::{Extent2d, ResourceArena, ResourceId, ResourceKind};
use crate::scheduler::{Submission, SyncPointKey, SyncPointRef};
use crate::sort::{self, SortPhase, SortPush};

/// Scripted surface behavior, consumed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The next acquire reports an outdated swapchain.
    OutdatedOnAcquire,
    /// The next present reports an outdated swapchain.
    OutdatedOnPresent,
    /// The surface is resized before the next acquire, which then reports
    /// an outdated swapchain. A zero extent models a minimized window.
    Resize(Extent2d),
    /// The next acquire reports a lost device.
    DeviceLost,
}

/// One executed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub stage: StageId,
    pub domain: ExecutionDomain,
    pub waits: Vec<SyncPointRef>,
    pub signals: Vec<SyncPointRef>,
    pub commands: usize,
}

impl SubmissionRecord {
    /// Whether the submission waited on a point signaled by `other`.
    pub fn waits_on(&self, other: &SubmissionRecord) -> bool {
        self.waits.iter().any(|wait| other.signals.contains(wait))
    }
}

/// One executed indirect dispatch with the workgroup counts it read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDispatchRecord {
    pub stage: StageId,
    pub program: ProgramId,
    pub groups: [u32; 3],
}

/// Everything the dummy backend observed.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Synchronization, ownership and access errors.
    pub violations: Vec<String>,
    /// Executed submissions in order.
    pub submissions: Vec<SubmissionRecord>,
    /// Presented images with the sync point each present waited on.
    pub presents: Vec<(u32, SyncPointRef)>,
    /// Indirect dispatches in execution order.
    pub indirect_dispatches: Vec<IndirectDispatchRecord>,
    /// Matched release/acquire pairs.
    pub matched_transfers: usize,
    /// Swapchain (re)creations.
    pub swapchain_recreations: u32,
    /// Calls to `wait_surface_events`.
    pub surface_waits: u32,
}

impl ValidationReport {
    /// Whether no violation was recorded.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug)]
struct DummyShared {
    events: VecDeque<SurfaceEvent>,
    report: ValidationReport,
    touched_clusters: Vec<u32>,
}

/// Shared view of a [`DummyBackend`], usable after the backend moved into
/// a driver.
#[derive(Debug, Clone)]
pub struct DummyHandle {
    shared: Arc<Mutex<DummyShared>>,
}

impl DummyHandle {
    /// Queue a surface event.
    pub fn push_event(&self, event: SurfaceEvent) {
        self.shared.lock().events.push_back(event);
    }

    /// Snapshot of the validation report.
    pub fn report(&self) -> ValidationReport {
        self.shared.lock().report.clone()
    }

    /// Cluster keys the flag pass marks from now on, standing in for the
    /// depth samples of the visible scene.
    pub fn touch_clusters(&self, keys: impl IntoIterator<Item = u32>) {
        self.shared.lock().touched_clusters = keys.into_iter().collect();
    }

    /// Forget recorded submissions, presents and indirect dispatches,
    /// keeping violations.
    pub fn clear_history(&self) {
        let mut shared = self.shared.lock();
        shared.report.submissions.clear();
        shared.report.presents.clear();
        shared.report.indirect_dispatches.clear();
    }
}

#[derive(Debug, Clone)]
struct PendingRelease {
    barrier: BufferBarrier,
    signals: Vec<SyncPointRef>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    shared: Arc<Mutex<DummyShared>>,
    domains: DomainMap,
    arena: ResourceArena,
    memory: HashMap<ResourceId, Vec<u8>>,
    owners: HashMap<ResourceId, ExecutionDomain>,
    in_transit: HashSet<ResourceId>,
    releases: Vec<PendingRelease>,
    /// Latest signaled generation of every sync point.
    signaled: HashMap<(SyncPointKey, u32), u64>,
    surface_extent: Extent2d,
    last_extent: Extent2d,
    image_count: u32,
    next_image: u32,
    next_program: u64,
}

impl DummyBackend {
    /// Create a dummy backend with a surface of `extent` and three images.
    pub fn new(extent: Extent2d) -> Self {
        Self {
            shared: Arc::new(Mutex::new(DummyShared {
                events: VecDeque::new(),
                report: ValidationReport::default(),
                touched_clusters: Vec::new(),
            })),
            domains: DomainMap::general_and_async(QueueRef::new(0, 0), QueueRef::new(1, 0)),
            arena: ResourceArena::new(),
            memory: HashMap::new(),
            owners: HashMap::new(),
            in_transit: HashSet::new(),
            releases: Vec::new(),
            signaled: HashMap::new(),
            surface_extent: extent,
            last_extent: extent,
            image_count: 3,
            next_image: 0,
            next_program: 0,
        }
    }

    /// Set the number of swapchain images created by the next recreation.
    pub fn with_image_count(mut self, image_count: u32) -> Self {
        assert!(image_count > 0, "swapchain needs at least one image");
        self.image_count = image_count;
        self
    }

    /// Report a different queue mapping. Defaults to separate families for
    /// the two domains.
    pub fn with_domains(mut self, domains: DomainMap) -> Self {
        self.domains = domains;
        self
    }

    /// Handle for scripting events and reading the report.
    pub fn handle(&self) -> DummyHandle {
        DummyHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot of the validation report.
    pub fn report(&self) -> ValidationReport {
        self.shared.lock().report.clone()
    }

    /// Current contents of a buffer. Never-written buffers read as zeros.
    pub fn buffer_contents(&self, id: ResourceId) -> Vec<u8> {
        match self.memory.get(&id) {
            Some(bytes) => bytes.clone(),
            None => vec![0; self.arena.get(id).size() as usize],
        }
    }

    /// Buffer contents reinterpreted as `T` elements.
    pub fn read_buffer<T: bytemuck::Pod>(&self, id: ResourceId) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.buffer_contents(id))
    }

    fn violation(&self, message: String) {
        log::warn!("DummyBackend: {}", message);
        self.shared.lock().report.violations.push(message);
    }

    fn buffer_mut(&mut self, id: ResourceId) -> &mut Vec<u8> {
        let size = self.arena.get(id).size() as usize;
        self.memory.entry(id).or_insert_with(|| vec![0; size])
    }

    fn read_bytes(&self, id: ResourceId, offset: usize, len: usize) -> Vec<u8> {
        match self.memory.get(&id) {
            Some(bytes) => bytes[offset..offset + len].to_vec(),
            None => vec![0; len],
        }
    }

    fn write_bytes(&mut self, id: ResourceId, offset: usize, data: &[u8]) {
        self.buffer_mut(id)[offset..offset + data.len()].copy_from_slice(data);
    }

    fn is_signaled(&self, point: &SyncPointRef) -> bool {
        self.signaled.get(&(point.key, point.index)) == Some(&point.generation)
    }

    /// Record a signal, replacing older generations of the same point.
    /// Returns `false` when the generation was already signaled.
    fn mark_signaled(&mut self, point: SyncPointRef) -> bool {
        self.signaled.insert((point.key, point.index), point.generation) != Some(point.generation)
    }

    fn check_access(&self, domain: ExecutionDomain, resource: ResourceId, stage: StageId) {
        if self.arena.get(resource).host_visible {
            return;
        }
        if self.in_transit.contains(&resource) {
            self.violation(format!(
                "{stage}: resource {resource} accessed between release and acquire"
            ));
        } else if self.owners.get(&resource) != Some(&domain) {
            self.violation(format!(
                "{stage}: resource {resource} accessed on {domain} but owned by {:?}",
                self.owners.get(&resource)
            ));
        }
    }

    fn barrier(&mut self, submission: &Submission, barrier: &BufferBarrier) {
        let stage = submission.stage();
        let resource = barrier.resource;
        match barrier.kind {
            BarrierKind::Release => {
                if submission.domain() != barrier.src_domain {
                    self.violation(format!(
                        "{stage}: release of {resource} recorded on {}",
                        submission.domain()
                    ));
                }
                self.check_access(barrier.src_domain, resource, stage);
                self.owners.remove(&resource);
                self.in_transit.insert(resource);
                self.releases.push(PendingRelease {
                    barrier: *barrier,
                    signals: submission.signals.clone(),
                });
            }
            BarrierKind::Acquire => {
                let waited: HashSet<_> = submission.waits.iter().map(|(r, _)| *r).collect();
                let matched = self.releases.iter().position(|release| {
                    release.barrier.matches(barrier)
                        && release
                            .signals
                            .iter()
                            .any(|s| s.key == barrier.sync && waited.contains(s))
                });
                match matched {
                    Some(index) => {
                        self.releases.remove(index);
                        self.shared.lock().report.matched_transfers += 1;
                    }
                    None => self.violation(format!(
                        "{stage}: acquire of {resource} has no matching release waited on via {}",
                        barrier.sync
                    )),
                }
                self.in_transit.remove(&resource);
                self.owners.insert(resource, barrier.dst_domain);
            }
            BarrierKind::Memory => {
                self.check_access(barrier.src_domain, resource, stage);
                self.owners.insert(resource, barrier.dst_domain);
            }
        }
    }

    fn binding(bindings: &[ResourceBinding], binding: Binding) -> Option<ResourceId> {
        bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.resource)
    }

    fn read_lights(&self, id: ResourceId, count: u32) -> Vec<LightRecord> {
        let bytes = self.read_bytes(id, 0, count as usize * LightRecord::SIZE as usize);
        bytemuck::pod_collect_to_vec(&bytes)
    }

    fn read_words(&self, id: ResourceId) -> Vec<u32> {
        bytemuck::pod_collect_to_vec(&self.buffer_contents(id))
    }

    fn read_counters(&self, id: ResourceId) -> ClusterCounters {
        bytemuck::pod_read_unaligned(&self.read_bytes(id, 0, ClusterCounters::SIZE as usize))
    }

    fn read_keys(&self, id: ResourceId, padded: u32) -> Vec<u64> {
        bytemuck::pod_collect_to_vec(&self.read_bytes(id, 0, padded as usize * 8))
    }

    fn execute_sort(&mut self, bindings: &[ResourceBinding], push: &[u8]) -> Option<()> {
        let push: SortPush = bytemuck::pod_read_unaligned(push);
        let target = Self::binding(bindings, Binding::SortTarget)?;
        let keys = match SortPhase::from_push(&push)? {
            SortPhase::Block => {
                let lights = self.read_lights(Self::binding(bindings, Binding::Lights)?, push.count);
                let mut keys = sort::compute_keys(&lights, push.padded, &push);
                sort::sort_blocks(&mut keys);
                keys
            }
            SortPhase::Merge { block_size } => {
                let mut keys =
                    self.read_keys(Self::binding(bindings, Binding::SortSource)?, push.padded);
                sort::merge_blocks(&mut keys, block_size);
                keys
            }
            SortPhase::Gather => {
                let keys = self.read_keys(Self::binding(bindings, Binding::SortSource)?, push.padded);
                let lights = self.read_lights(Self::binding(bindings, Binding::Lights)?, push.count);
                let sorted = sort::gather(&keys, &lights, push.count);
                let output = Self::binding(bindings, Binding::SortedLights)?;
                self.write_bytes(output, 0, bytemuck::cast_slice(&sorted));
                keys
            }
        };
        self.write_bytes(target, 0, bytemuck::cast_slice(&keys));
        Some(())
    }

    fn execute_bvh(&mut self, bindings: &[ResourceBinding], push: &[u8]) -> Option<()> {
        let push: BvhPush = bytemuck::pod_read_unaligned(push);
        let level = push.level();
        let nodes_id = Self::binding(bindings, Binding::BvhNodes)?;
        let lights = if level.is_leaf() {
            let count = level.input_offset + level.element_count;
            self.read_lights(Self::binding(bindings, Binding::SortedLights)?, count)
        } else {
            Vec::new()
        };
        let mut nodes: Vec<BvhNode> = bytemuck::pod_collect_to_vec(&self.buffer_contents(nodes_id));
        bvh::build_level(&lights, &mut nodes, &level, push.subgroup_size);
        self.write_bytes(nodes_id, 0, bytemuck::cast_slice(&nodes));
        Some(())
    }

    fn execute_cluster(
        &mut self,
        program: ProgramId,
        bindings: &[ResourceBinding],
        push: &[u8],
    ) -> Option<()> {
        if push.len() < std::mem::size_of::<ClusterPush>() {
            return None;
        }
        let layout = bytemuck::pod_read_unaligned::<ClusterPush>(
            &push[..std::mem::size_of::<ClusterPush>()],
        )
        .layout();
        let stride = layout.page_stride();
        match program {
            ProgramId::ClusterFlag => {
                let table_id = Self::binding(bindings, Binding::PageTable)?;
                let mut table = self.read_words(table_id);
                let touched = self.shared.lock().touched_clusters.clone();
                cluster::flag_clusters(&mut table, touched);
                self.write_bytes(table_id, 0, bytemuck::cast_slice(&table));
            }
            ProgramId::ClusterAlloc => {
                let table_id = Self::binding(bindings, Binding::PageTable)?;
                let counters_id = Self::binding(bindings, Binding::ClusterCounters)?;
                let mut table = self.read_words(table_id);
                let mut counters = self.read_counters(counters_id);
                cluster::alloc_pages(&mut table, &mut counters, layout.page_capacity);
                self.write_bytes(table_id, 0, bytemuck::cast_slice(&table));
                self.write_bytes(counters_id, 0, bytemuck::bytes_of(&counters));
            }
            ProgramId::ClusterStore => {
                let table = self.read_words(Self::binding(bindings, Binding::PageTable)?);
                let pool_id = Self::binding(bindings, Binding::PagePool)?;
                let mut pool = self.read_words(pool_id);
                cluster::store_headers(&table, &mut pool, stride);
                self.write_bytes(pool_id, 0, bytemuck::cast_slice(&pool));
            }
            ProgramId::ClusterCompact => {
                let pool = self.read_words(Self::binding(bindings, Binding::PagePool)?);
                let unique_id = Self::binding(bindings, Binding::UniqueClusters)?;
                let counters_id = Self::binding(bindings, Binding::ClusterCounters)?;
                let mut unique = self.read_words(unique_id);
                let mut counters = self.read_counters(counters_id);
                cluster::compact_pages(&pool, stride, &mut unique, &mut counters);
                self.write_bytes(unique_id, 0, bytemuck::cast_slice(&unique));
                self.write_bytes(counters_id, 0, bytemuck::bytes_of(&counters));
            }
            _ => {}
        }
        Some(())
    }

    fn dispatch(
        &mut self,
        stage: StageId,
        program: ProgramId,
        bindings: &[ResourceBinding],
        push: &[u8],
    ) {
        let executed = match program {
            ProgramId::LightSortBlock | ProgramId::LightSortMerge => {
                self.execute_sort(bindings, push)
            }
            ProgramId::BvhBuild => self.execute_bvh(bindings, push),
            ProgramId::ClusterFlag
            | ProgramId::ClusterAlloc
            | ProgramId::ClusterStore
            | ProgramId::ClusterCompact => self.execute_cluster(program, bindings, push),
            _ => Some(()),
        };
        if executed.is_none() {
            self.violation(format!(
                "{stage}: dispatch of '{}' is missing bindings or push constants",
                program.shader()
            ));
        }
    }

    fn execute(&mut self, submission: &Submission, command: &Command) {
        let stage = submission.stage();
        let domain = submission.domain();
        for (resource, _) in command.accesses() {
            self.check_access(domain, resource, stage);
        }
        match command {
            Command::SeedOwnership { resource } => {
                if let Some(owner) = self.owners.insert(*resource, domain)
                    && owner != domain
                {
                    self.violation(format!(
                        "{stage}: resource {resource} seeded on {domain} but owned by {owner}"
                    ));
                }
            }
            Command::FillBuffer {
                resource,
                range,
                value,
            } => {
                let words = vec![*value; (range.size / 4) as usize];
                self.write_bytes(*resource, range.offset as usize, bytemuck::cast_slice(&words));
            }
            Command::UpdateBuffer {
                resource,
                offset,
                data,
            } => self.write_bytes(*resource, *offset as usize, bytemuck::cast_slice(data)),
            Command::CopyBuffer { src, dst, region } => {
                let bytes = self.read_bytes(*src, region.src_offset as usize, region.size as usize);
                self.write_bytes(*dst, region.dst_offset as usize, &bytes);
            }
            Command::Dispatch {
                program,
                bindings,
                push,
                ..
            } => self.dispatch(stage, program.id, bindings, push),
            Command::DispatchIndirect {
                program,
                args,
                offset,
                bindings,
                push,
            } => {
                let bytes = self.read_bytes(*args, *offset as usize, 12);
                let groups: [u32; 3] = bytemuck::pod_read_unaligned(&bytes);
                self.shared
                    .lock()
                    .report
                    .indirect_dispatches
                    .push(IndirectDispatchRecord {
                        stage,
                        program: program.id,
                        groups,
                    });
                if groups.contains(&0) {
                    log::trace!(
                        "DummyBackend: '{}' dispatched with no workgroups",
                        program.id.shader()
                    );
                } else {
                    self.dispatch(stage, program.id, bindings, push);
                }
            }
            Command::BufferBarrier(barrier) => self.barrier(submission, barrier),
            Command::BeginRendering { .. }
            | Command::DrawIndexed { .. }
            | Command::Draw { .. }
            | Command::OverlayDraws { .. }
            | Command::EndRendering
            | Command::MemoryBarrier(_) => {}
        }
    }

    fn take_event(&mut self, accept: impl Fn(&SurfaceEvent) -> bool) -> Option<SurfaceEvent> {
        let mut shared = self.shared.lock();
        if shared.events.front().is_some_and(accept) {
            shared.events.pop_front()
        } else {
            None
        }
    }
}

impl FrameBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn domain_map(&self) -> DomainMap {
        self.domains
    }

    fn create_resources(&mut self, arena: &ResourceArena) -> Result<(), FrameError> {
        log::trace!(
            "DummyBackend: creating {} resources ({} bytes)",
            arena.len(),
            arena.total_bytes()
        );
        for (id, desc) in arena.iter() {
            if let ResourceKind::Buffer { size } = desc.kind
                && size % 4 != 0
            {
                return Err(FrameError::ResourceCreationFailed(format!(
                    "buffer '{}' ({id}) size {size} is not a multiple of 4",
                    desc.name
                )));
            }
        }
        self.arena = arena.clone();
        self.memory.clear();
        self.owners.clear();
        self.in_transit.clear();
        Ok(())
    }

    fn create_program(
        &mut self,
        id: ProgramId,
        bindings: &'static [Binding],
    ) -> Result<ProgramHandle, FrameError> {
        if bindings.is_empty() {
            return Err(FrameError::ResourceCreationFailed(format!(
                "program '{}' has no bindings",
                id.shader()
            )));
        }
        let handle = ProgramHandle(self.next_program);
        self.next_program += 1;
        log::trace!("DummyBackend: program '{}' -> {:?}", id.shader(), handle);
        Ok(handle)
    }

    fn recreate_swapchain(
        &mut self,
        extent: Extent2d,
        present_mode: PresentMode,
    ) -> Result<SwapchainInfo, FrameError> {
        if extent.is_zero_area() {
            return Err(FrameError::InvalidConfig(
                "swapchain extent must be non-zero".into(),
            ));
        }
        log::debug!(
            "DummyBackend: swapchain {}x{} ({:?}, {} images)",
            extent.width,
            extent.height,
            present_mode,
            self.image_count
        );
        self.next_image = 0;
        self.shared.lock().report.swapchain_recreations += 1;
        Ok(SwapchainInfo {
            extent,
            image_count: self.image_count,
        })
    }

    fn surface_extent(&self) -> Extent2d {
        self.surface_extent
    }

    fn wait_surface_events(&mut self) -> Extent2d {
        self.shared.lock().report.surface_waits += 1;
        match self.take_event(|e| matches!(e, SurfaceEvent::Resize(_))) {
            Some(SurfaceEvent::Resize(extent)) => self.surface_extent = extent,
            _ => {
                // Nothing scripted: the window comes back at its last size.
                if self.surface_extent.is_zero_area() {
                    self.surface_extent = self.last_extent;
                }
            }
        }
        if !self.surface_extent.is_zero_area() {
            self.last_extent = self.surface_extent;
        }
        self.surface_extent
    }

    fn write_staging(&mut self, staging: ResourceId, data: &[u8]) -> Result<(), FrameError> {
        let desc = self.arena.get(staging);
        if !desc.host_visible {
            return Err(FrameError::Internal(format!(
                "resource {staging} '{}' is not host-visible",
                desc.name
            )));
        }
        if data.len() as u64 > desc.size() {
            return Err(FrameError::Internal(format!(
                "{} bytes written to staging {staging} of {} bytes",
                data.len(),
                desc.size()
            )));
        }
        self.write_bytes(staging, 0, data);
        Ok(())
    }

    fn acquire_image(&mut self, signal: SyncPointRef) -> Result<u32, FrameError> {
        let event = self.take_event(|e| !matches!(e, SurfaceEvent::OutdatedOnPresent));
        match event {
            Some(SurfaceEvent::OutdatedOnAcquire) => return Err(FrameError::SurfaceOutdated),
            Some(SurfaceEvent::Resize(extent)) => {
                self.surface_extent = extent;
                if !extent.is_zero_area() {
                    self.last_extent = extent;
                }
                return Err(FrameError::SurfaceOutdated);
            }
            Some(SurfaceEvent::DeviceLost) => return Err(FrameError::DeviceLost),
            Some(SurfaceEvent::OutdatedOnPresent) | None => {}
        }

        if !self.mark_signaled(signal) {
            self.violation(format!("acquire signaled {signal} twice"));
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        log::trace!("DummyBackend: acquired image {} ({})", image, signal);
        Ok(image)
    }

    fn submit(&mut self, submission: Submission) -> Result<(), FrameError> {
        let stage = submission.stage();
        for (wait, _) in &submission.waits {
            if !self.is_signaled(wait) {
                self.violation(format!("{stage}: waited on {wait} before it was signaled"));
            }
        }

        for command in submission.stream.commands() {
            self.execute(&submission, command);
        }

        for signal in &submission.signals {
            if !self.mark_signaled(*signal) {
                self.violation(format!("{stage}: {signal} signaled twice"));
            }
        }
        if let Some(fence) = &submission.fence {
            fence.signal();
        }

        log::trace!(
            "DummyBackend: executed '{}' on {} ({} commands)",
            stage,
            submission.domain(),
            submission.stream.len()
        );
        self.shared.lock().report.submissions.push(SubmissionRecord {
            stage,
            domain: submission.domain(),
            waits: submission.waits.iter().map(|(point, _)| *point).collect(),
            signals: submission.signals.clone(),
            commands: submission.stream.len(),
        });
        Ok(())
    }

    fn present(&mut self, image: u32, wait: SyncPointRef) -> Result<(), FrameError> {
        if !self.is_signaled(&wait) {
            self.violation(format!("present of image {image} waited on unsignaled {wait}"));
        }
        self.shared.lock().report.presents.push((image, wait));
        if self
            .take_event(|e| matches!(e, SurfaceEvent::OutdatedOnPresent))
            .is_some()
        {
            return Err(FrameError::SurfaceOutdated);
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        for release in std::mem::take(&mut self.releases) {
            self.violation(format!(
                "release of {} from {} was never acquired",
                release.barrier.resource, release.barrier.src_domain
            ));
        }
        // Sync points are recreated by the caller after an idle wait.
        self.signaled.clear();
        log::trace!("DummyBackend: idle");
        Ok(())
    }
}
