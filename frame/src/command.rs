//! Recorded command streams.
//!
//! A [`CommandStream`] is the backend-agnostic recording of one stage's GPU
//! work. Backends translate streams into native command buffers; the
//! [`DummyBackend`](crate::backend::DummyBackend) executes and validates them
//! on the CPU.

use bitflags::bitflags;

use crate::domain::ExecutionDomain;
use crate::graph::StageId;
use crate::program::ProgramRef;
use crate::resource::ResourceId;
use crate::scheduler::{FrameSlot, SyncPointKey};

bitflags! {
    /// Memory access types, as used in barrier masks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_WRITE = 1 << 6;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 7;
        const TRANSFER_READ = 1 << 8;
        const TRANSFER_WRITE = 1 << 9;
        const HOST_WRITE = 1 << 10;
    }
}

bitflags! {
    /// Pipeline stages, as used in barriers and sync point waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const FRAGMENT_SHADER = 1 << 5;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 6;
        const COMPUTE_SHADER = 1 << 7;
        const TRANSFER = 1 << 8;
        const BOTTOM_OF_PIPE = 1 << 9;
        const HOST = 1 << 10;
    }
}

/// Coarse access state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessState {
    /// Not accessed.
    #[default]
    Idle,
    /// Read only.
    Read,
    /// Written (possibly also read).
    Write,
}

impl AccessFlags {
    /// All write access bits.
    pub const WRITES: Self = Self::SHADER_WRITE
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(Self::TRANSFER_WRITE)
        .union(Self::HOST_WRITE);

    /// Read and write from a shader.
    pub const SHADER_READ_WRITE: Self = Self::SHADER_READ.union(Self::SHADER_WRITE);

    /// Check if this access includes a write.
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITES)
    }

    /// Coarse state for this access.
    pub fn state(self) -> AccessState {
        if self.is_empty() {
            AccessState::Idle
        } else if self.is_write() {
            AccessState::Write
        } else {
            AccessState::Read
        }
    }

    /// Pipeline stages that perform this access.
    pub fn stages(self) -> PipelineStages {
        let mut stages = PipelineStages::empty();
        if self.contains(Self::INDIRECT_COMMAND_READ) {
            stages |= PipelineStages::DRAW_INDIRECT;
        }
        if self.intersects(Self::INDEX_READ | Self::VERTEX_ATTRIBUTE_READ) {
            stages |= PipelineStages::VERTEX_INPUT;
        }
        if self.intersects(Self::UNIFORM_READ | Self::SHADER_READ | Self::SHADER_WRITE) {
            stages |= PipelineStages::VERTEX_SHADER
                | PipelineStages::FRAGMENT_SHADER
                | PipelineStages::COMPUTE_SHADER;
        }
        if self.contains(Self::COLOR_ATTACHMENT_WRITE) {
            stages |= PipelineStages::COLOR_ATTACHMENT_OUTPUT;
        }
        if self.contains(Self::DEPTH_STENCIL_ATTACHMENT_WRITE) {
            stages |= PipelineStages::EARLY_FRAGMENT_TESTS;
        }
        if self.intersects(Self::TRANSFER_READ | Self::TRANSFER_WRITE) {
            stages |= PipelineStages::TRANSFER;
        }
        if self.contains(Self::HOST_WRITE) {
            stages |= PipelineStages::HOST;
        }
        if stages.is_empty() {
            PipelineStages::TOP_OF_PIPE
        } else {
            stages
        }
    }
}

/// A byte range within a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    /// Offset in bytes.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

impl BufferRange {
    /// Create a new range.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Range covering `size` bytes from the start.
    pub fn whole(size: u64) -> Self {
        Self { offset: 0, size }
    }
}

/// A region for buffer-to-buffer copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferCopyRegion {
    /// Offset in bytes from the start of the source buffer.
    pub src_offset: u64,
    /// Offset in bytes from the start of the destination buffer.
    pub dst_offset: u64,
    /// Number of bytes to copy.
    pub size: u64,
}

impl BufferCopyRegion {
    /// Copy `size` bytes between the starts of both buffers.
    pub fn whole(size: u64) -> Self {
        Self {
            src_offset: 0,
            dst_offset: 0,
            size,
        }
    }
}

/// Which half of an ownership transfer a barrier is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// Recorded on the releasing domain's stream.
    Release,
    /// Recorded on the acquiring domain's stream.
    Acquire,
    /// Both domains share a queue family; a single memory barrier on the
    /// acquiring stream moves logical ownership.
    Memory,
}

/// A buffer barrier that moves ownership between domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Release, acquire or same-family memory barrier.
    pub kind: BarrierKind,
    /// The transferred resource.
    pub resource: ResourceId,
    /// Addressed range. Identical on both halves of a transfer.
    pub range: BufferRange,
    /// Releasing domain.
    pub src_domain: ExecutionDomain,
    /// Acquiring domain.
    pub dst_domain: ExecutionDomain,
    /// Access performed before the transfer.
    pub src_access: AccessFlags,
    /// Access performed after the transfer.
    pub dst_access: AccessFlags,
    /// Sync point ordering the acquire after the release.
    pub sync: SyncPointKey,
    /// Frame slot the transfer belongs to.
    pub slot: FrameSlot,
}

impl BufferBarrier {
    /// Source stage mask. The acquire half has no source access.
    pub fn src_stages(&self) -> PipelineStages {
        match self.kind {
            BarrierKind::Acquire => PipelineStages::TOP_OF_PIPE,
            _ => self.src_access.stages(),
        }
    }

    /// Destination stage mask. The release half has no destination access.
    pub fn dst_stages(&self) -> PipelineStages {
        match self.kind {
            BarrierKind::Release => PipelineStages::BOTTOM_OF_PIPE,
            _ => self.dst_access.stages(),
        }
    }

    /// Whether two barriers are the matching halves of one transfer.
    pub fn matches(&self, other: &BufferBarrier) -> bool {
        self.resource == other.resource
            && self.range == other.range
            && self.src_domain == other.src_domain
            && self.dst_domain == other.dst_domain
            && self.sync == other.sync
            && self.slot == other.slot
    }
}

/// An execution and memory dependency within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    /// Stages that must complete.
    pub src_stages: PipelineStages,
    /// Writes to make available.
    pub src_access: AccessFlags,
    /// Stages that wait.
    pub dst_stages: PipelineStages,
    /// Accesses that must see the writes.
    pub dst_access: AccessFlags,
}

impl MemoryBarrier {
    /// Barrier between two accesses, deriving the stage masks.
    pub fn between(src_access: AccessFlags, dst_access: AccessFlags) -> Self {
        Self {
            src_stages: src_access.stages(),
            src_access,
            dst_stages: dst_access.stages(),
            dst_access,
        }
    }
}

/// Interface binding slots of the frame programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Unsorted device-local light list.
    Lights,
    /// Sort entries read by a sort phase.
    SortSource,
    /// Sort entries written by a sort phase.
    SortTarget,
    /// Sorted light records.
    SortedLights,
    /// BVH node storage.
    BvhNodes,
    /// G-buffer depth.
    Depth,
    /// G-buffer albedo.
    Albedo,
    /// G-buffer normal.
    Normal,
    /// G-buffer specular.
    Specular,
    /// Cluster page table.
    PageTable,
    /// Cluster page pool.
    PagePool,
    /// Compacted unique cluster list.
    UniqueClusters,
    /// Cluster allocation counters and indirect arguments.
    ClusterCounters,
    /// Per-tile light lists.
    TileLights,
    /// Geometry vertex and index data.
    Geometry,
}

/// A resource bound to a program slot for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBinding {
    /// Interface slot.
    pub binding: Binding,
    /// Bound resource.
    pub resource: ResourceId,
    /// How the command accesses it.
    pub access: AccessFlags,
}

impl ResourceBinding {
    /// Create a new binding.
    pub fn new(binding: Binding, resource: ResourceId, access: AccessFlags) -> Self {
        Self {
            binding,
            resource,
            access,
        }
    }
}

/// Render target of a rendering scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// An acquired swapchain image.
    Swapchain(u32),
    /// A frame resource (G-buffer attachment).
    Resource(ResourceId),
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Zero-size write establishing the first owner of a resource.
    SeedOwnership {
        /// Seeded resource.
        resource: ResourceId,
    },
    /// Fill a range with a repeated 32-bit value.
    FillBuffer {
        /// Destination buffer.
        resource: ResourceId,
        /// Filled range.
        range: BufferRange,
        /// Fill value.
        value: u32,
    },
    /// Write inline data into a buffer.
    UpdateBuffer {
        /// Destination buffer.
        resource: ResourceId,
        /// Byte offset.
        offset: u64,
        /// 32-bit words to write.
        data: Vec<u32>,
    },
    /// Copy between buffers.
    CopyBuffer {
        /// Source buffer.
        src: ResourceId,
        /// Destination buffer.
        dst: ResourceId,
        /// Copied region.
        region: BufferCopyRegion,
    },
    /// Direct compute dispatch.
    Dispatch {
        /// Program to run.
        program: ProgramRef,
        /// Workgroup counts.
        groups: [u32; 3],
        /// Bound resources.
        bindings: Vec<ResourceBinding>,
        /// Push constant bytes.
        push: Vec<u8>,
    },
    /// Compute dispatch with GPU-written workgroup counts.
    DispatchIndirect {
        /// Program to run.
        program: ProgramRef,
        /// Buffer holding `[x, y, z]` workgroup counts.
        args: ResourceId,
        /// Byte offset of the arguments.
        offset: u64,
        /// Bound resources.
        bindings: Vec<ResourceBinding>,
        /// Push constant bytes.
        push: Vec<u8>,
    },
    /// Begin a rendering scope.
    BeginRendering {
        /// Color targets.
        color: Vec<RenderTarget>,
        /// Depth target.
        depth: Option<ResourceId>,
    },
    /// Indexed draw of one geometry part.
    DrawIndexed {
        /// Program to run.
        program: ProgramRef,
        /// First index.
        first_index: u32,
        /// Index count.
        index_count: u32,
        /// Vertex offset.
        vertex_offset: i32,
        /// Material descriptor key.
        material_key: u32,
        /// Bound resources.
        bindings: Vec<ResourceBinding>,
        /// Push constant bytes.
        push: Vec<u8>,
    },
    /// Non-indexed draw (fullscreen passes).
    Draw {
        /// Program to run.
        program: ProgramRef,
        /// Vertex count.
        vertex_count: u32,
        /// Bound resources.
        bindings: Vec<ResourceBinding>,
        /// Push constant bytes.
        push: Vec<u8>,
    },
    /// Overlay draw commands merged from the UI layer.
    OverlayDraws {
        /// Number of overlay draw commands.
        count: u32,
    },
    /// End the current rendering scope.
    EndRendering,
    /// Ownership transfer half.
    BufferBarrier(BufferBarrier),
    /// Intra-stream memory dependency.
    MemoryBarrier(MemoryBarrier),
}

impl Command {
    /// Resources this command reads or writes, with the access performed.
    ///
    /// Barriers and ownership seeds are not accesses.
    pub fn accesses(&self) -> Vec<(ResourceId, AccessFlags)> {
        match self {
            Self::FillBuffer { resource, .. } | Self::UpdateBuffer { resource, .. } => {
                vec![(*resource, AccessFlags::TRANSFER_WRITE)]
            }
            Self::CopyBuffer { src, dst, .. } => vec![
                (*src, AccessFlags::TRANSFER_READ),
                (*dst, AccessFlags::TRANSFER_WRITE),
            ],
            Self::Dispatch { bindings, .. }
            | Self::Draw { bindings, .. }
            | Self::DrawIndexed { bindings, .. } => {
                bindings.iter().map(|b| (b.resource, b.access)).collect()
            }
            Self::DispatchIndirect { args, bindings, .. } => {
                let mut out = vec![(*args, AccessFlags::INDIRECT_COMMAND_READ)];
                out.extend(bindings.iter().map(|b| (b.resource, b.access)));
                out
            }
            Self::BeginRendering { color, depth } => {
                let mut out: Vec<_> = color
                    .iter()
                    .filter_map(|target| match target {
                        RenderTarget::Resource(id) => {
                            Some((*id, AccessFlags::COLOR_ATTACHMENT_WRITE))
                        }
                        RenderTarget::Swapchain(_) => None,
                    })
                    .collect();
                if let Some(depth) = depth {
                    out.push((*depth, AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
                }
                out
            }
            Self::SeedOwnership { .. }
            | Self::OverlayDraws { .. }
            | Self::EndRendering
            | Self::BufferBarrier(_)
            | Self::MemoryBarrier(_) => Vec::new(),
        }
    }
}

/// Commands recorded for one stage on one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStream {
    stage: StageId,
    domain: ExecutionDomain,
    commands: Vec<Command>,
}

impl CommandStream {
    /// Create an empty stream.
    pub fn new(stage: StageId, domain: ExecutionDomain) -> Self {
        Self {
            stage,
            domain,
            commands: Vec::new(),
        }
    }

    /// Stage this stream belongs to.
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Domain the stream executes on.
    pub fn domain(&self) -> ExecutionDomain {
        self.domain
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Insert a command at the front (acquire barriers, ownership seeds).
    pub fn push_front(&mut self, command: Command) {
        self.commands.insert(0, command);
    }

    /// Append a memory barrier between two accesses.
    pub fn memory_barrier(&mut self, src_access: AccessFlags, dst_access: AccessFlags) {
        self.push(Command::MemoryBarrier(MemoryBarrier::between(
            src_access, dst_access,
        )));
    }

    /// Recorded commands.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Ownership barriers of the given kind.
    pub fn buffer_barriers(&self, kind: BarrierKind) -> impl Iterator<Item = &BufferBarrier> {
        self.commands.iter().filter_map(move |c| match c {
            Command::BufferBarrier(b) if b.kind == kind => Some(b),
            _ => None,
        })
    }

    /// Number of dispatches, direct or indirect.
    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch { .. } | Command::DispatchIndirect { .. }))
            .count()
    }
}
