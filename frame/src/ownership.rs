//! Cross-domain resource ownership tracking.
//!
//! Every device-local resource shared between the two execution domains has
//! exactly one owning domain at a time. Ownership only changes through
//! [`OwnershipTracker::transfer`], which records both halves of the move:
//!
//! - a **release** barrier at the end of the releasing domain's stream, and
//! - an **acquire** barrier at the front of the acquiring domain's stream,
//!
//! with identical resource, range and domain pair. The acquire is ordered
//! after the release by the sync point named in the transfer; the tracker
//! never relies on submission order across domains.
//!
//! When both domains map to the same queue family, no family transfer is
//! needed and a single memory barrier on the acquiring stream moves logical
//! ownership.
//!
//! Host-visible staging buffers are owned by the host. The tracker only
//! checks that the host does not rewrite a staging buffer while a copy from
//! it may still be in flight.

use std::collections::HashMap;

use crate::command::{
    AccessFlags, AccessState, BarrierKind, BufferBarrier, BufferRange, Command, CommandStream,
};
use crate::domain::{DomainMap, ExecutionDomain};
use crate::graph::StageId;
use crate::resource::ResourceId;
use crate::scheduler::{FrameSlot, SyncPointKey};

/// A requested ownership move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Transferred resource.
    pub resource: ResourceId,
    /// Addressed range.
    pub range: BufferRange,
    /// Current owner.
    pub from: ExecutionDomain,
    /// New owner.
    pub to: ExecutionDomain,
    /// Last access on the releasing domain.
    pub before: AccessFlags,
    /// First access on the acquiring domain.
    pub after: AccessFlags,
    /// Sync point the acquiring submission waits on.
    pub sync: SyncPointKey,
    /// Frame slot of the transfer.
    pub slot: FrameSlot,
}

/// What a transfer recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Source and destination domain are the same; nothing recorded.
    Noop,
    /// Same queue family; one memory barrier on the acquiring stream.
    Memory,
    /// Release on the releasing stream plus acquire on the acquiring stream.
    ReleaseAcquire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTransfer {
    to_stage: StageId,
    slot: FrameSlot,
}

#[derive(Debug, Clone, Copy, Default)]
struct OwnershipEntry {
    owner: Option<ExecutionDomain>,
    state: AccessState,
    pending: Option<PendingTransfer>,
}

/// Tracks the owning domain of every shared resource.
#[derive(Debug, Clone)]
pub struct OwnershipTracker {
    domains: DomainMap,
    entries: HashMap<ResourceId, OwnershipEntry>,
    pending_seeds: [Vec<ResourceId>; 2],
    host_reads: Vec<(ResourceId, FrameSlot)>,
}

impl OwnershipTracker {
    /// Create an empty tracker for a domain mapping.
    pub fn new(domains: DomainMap) -> Self {
        Self {
            domains,
            entries: HashMap::new(),
            pending_seeds: [Vec::new(), Vec::new()],
            host_reads: Vec::new(),
        }
    }

    /// Domain mapping the tracker records barriers for.
    pub fn domains(&self) -> &DomainMap {
        &self.domains
    }

    /// Forget all ownership. Only valid while the device is idle.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.pending_seeds.iter_mut().for_each(Vec::clear);
        self.host_reads.clear();
    }

    /// Establish the first owner of a resource.
    ///
    /// A zero-size write is queued for the next stream recorded on `domain`
    /// (see [`take_seeds`](Self::take_seeds)).
    ///
    /// # Panics
    ///
    /// Panics if the resource already has an owner.
    pub fn seed(&mut self, resource: ResourceId, domain: ExecutionDomain) {
        let entry = self.entries.entry(resource).or_default();
        assert!(
            entry.owner.is_none(),
            "Resource {resource} seeded but already owned by {:?}",
            entry.owner
        );
        entry.owner = Some(domain);
        self.pending_seeds[domain.index()].push(resource);
        log::trace!("Seeded ownership of {} on {}", resource, domain);
    }

    /// Seed commands waiting for the next stream of `domain`.
    pub fn take_seeds(&mut self, domain: ExecutionDomain) -> Vec<Command> {
        std::mem::take(&mut self.pending_seeds[domain.index()])
            .into_iter()
            .map(|resource| Command::SeedOwnership { resource })
            .collect()
    }

    /// Move ownership of a resource between domains.
    ///
    /// # Panics
    ///
    /// Panics if `from` does not own the resource. A move between different
    /// domains also panics if a prior transfer of the resource has not been
    /// acquired yet, or if the streams do not belong to the releasing and
    /// acquiring domains.
    pub fn transfer(
        &mut self,
        transfer: Transfer,
        release: &mut CommandStream,
        acquire: &mut CommandStream,
    ) -> TransferOutcome {
        let Transfer {
            resource,
            from,
            to,
            ..
        } = transfer;
        let entry = self.entries.entry(resource).or_default();
        assert_eq!(
            entry.owner,
            Some(from),
            "Resource {resource} transferred from {from} but owned by {:?}",
            entry.owner
        );
        if from == to {
            return TransferOutcome::Noop;
        }
        assert!(
            entry.pending.is_none(),
            "Resource {resource} transferred while a prior transfer is pending"
        );

        assert_eq!(release.domain(), from, "Release stream must run on {from}");
        assert_eq!(acquire.domain(), to, "Acquire stream must run on {to}");

        let barrier = |kind| BufferBarrier {
            kind,
            resource,
            range: transfer.range,
            src_domain: from,
            dst_domain: to,
            src_access: transfer.before,
            dst_access: transfer.after,
            sync: transfer.sync,
            slot: transfer.slot,
        };

        let outcome = if self.domains.needs_family_transfer(from, to) {
            release.push(Command::BufferBarrier(barrier(BarrierKind::Release)));
            acquire.push_front(Command::BufferBarrier(barrier(BarrierKind::Acquire)));
            TransferOutcome::ReleaseAcquire
        } else {
            acquire.push_front(Command::BufferBarrier(barrier(BarrierKind::Memory)));
            TransferOutcome::Memory
        };

        entry.owner = Some(to);
        entry.state = AccessState::Idle;
        entry.pending = Some(PendingTransfer {
            to_stage: acquire.stage(),
            slot: transfer.slot,
        });
        log::trace!(
            "Transfer {} {} -> {} ({:?}, {} -> {})",
            resource,
            from,
            to,
            outcome,
            release.stage(),
            acquire.stage()
        );
        outcome
    }

    /// Mark the start of recording `stage`. Transfers into it complete here.
    pub fn begin_stage(&mut self, stage: StageId) {
        for entry in self.entries.values_mut() {
            if entry.pending.is_some_and(|p| p.to_stage == stage) {
                entry.pending = None;
            }
        }
    }

    /// Record an access by `domain`.
    ///
    /// # Panics
    ///
    /// Panics if `domain` does not own the resource or the resource's
    /// acquire has not been recorded yet.
    pub fn access(&mut self, resource: ResourceId, domain: ExecutionDomain, access: AccessFlags) {
        let entry = self.entries.entry(resource).or_default();
        assert_eq!(
            entry.owner,
            Some(domain),
            "Resource {resource} accessed on {domain} but owned by {:?}",
            entry.owner
        );
        assert!(
            entry.pending.is_none(),
            "Resource {resource} accessed before its acquire"
        );
        entry.state = access.state();
    }

    /// Current owner of a resource.
    pub fn owner(&self, resource: ResourceId) -> Option<ExecutionDomain> {
        self.entries.get(&resource).and_then(|e| e.owner)
    }

    /// Last recorded access state of a resource.
    pub fn state(&self, resource: ResourceId) -> AccessState {
        self.entries
            .get(&resource)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    /// Whether a transfer of the resource waits for its acquiring stage.
    pub fn is_pending(&self, resource: ResourceId) -> bool {
        self.entries
            .get(&resource)
            .is_some_and(|e| e.pending.is_some())
    }

    /// Slot of the pending transfer of a resource, if any.
    pub fn pending_slot(&self, resource: ResourceId) -> Option<FrameSlot> {
        self.entries
            .get(&resource)
            .and_then(|e| e.pending)
            .map(|p| p.slot)
    }

    /// Record a host write into a staging buffer.
    ///
    /// # Panics
    ///
    /// Panics if a copy from the buffer may still be in flight.
    pub fn host_write(&mut self, staging: ResourceId) {
        if let Some((_, slot)) = self.host_reads.iter().find(|(id, _)| *id == staging) {
            panic!("Staging {staging} rewritten while a copy from slot {slot} is in flight");
        }
    }

    /// Record a device copy reading a staging buffer in `slot`.
    pub fn host_read(&mut self, staging: ResourceId, slot: FrameSlot) {
        self.host_reads.push((staging, slot));
    }

    /// Release staging buffers read by `slot`. Call after the slot's fence
    /// signaled.
    pub fn retire_slot(&mut self, slot: FrameSlot) {
        self.host_reads.retain(|(_, s)| *s != slot);
    }
}
