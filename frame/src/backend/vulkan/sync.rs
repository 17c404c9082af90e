//! Semaphores behind sync points and fence retirement.
//!
//! Stage completion points may have several waiters, so they are timeline
//! semaphores signaled to `generation + 1`. Image acquisition and
//! presentation only accept binary semaphores; those points have exactly
//! one waiter per signal.

use std::collections::HashMap;
use std::thread::JoinHandle;

use ash::vk;

use super::conversion::convert_result;
use crate::domain::ExecutionDomain;
use crate::error::FrameError;
use crate::scheduler::{Fence, SyncPointKey, SyncPointRef};

/// Semaphore flavour backing a sync point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreKind {
    Binary,
    Timeline,
}

impl SemaphoreKind {
    /// Flavour for a sync point key.
    pub fn of(key: SyncPointKey) -> Self {
        match key {
            SyncPointKey::ImageAvailable | SyncPointKey::RenderFinished => Self::Binary,
            SyncPointKey::StageDone(_) => Self::Timeline,
        }
    }
}

/// Value a submission waits for or signals on the semaphore of `point`.
///
/// Binary semaphores ignore the value.
pub fn semaphore_value(point: &SyncPointRef) -> u64 {
    match SemaphoreKind::of(point.key) {
        SemaphoreKind::Binary => 0,
        SemaphoreKind::Timeline => point.generation + 1,
    }
}

/// Lazily created semaphores, one per sync point and index.
#[derive(Debug, Default)]
pub struct SyncSemaphores {
    semaphores: HashMap<(SyncPointKey, u32), vk::Semaphore>,
}

impl SyncSemaphores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Semaphore and value for a sync point.
    pub fn get(
        &mut self,
        device: &ash::Device,
        point: &SyncPointRef,
    ) -> Result<(vk::Semaphore, u64), FrameError> {
        let slot = (point.key, point.index);
        let semaphore = match self.semaphores.get(&slot) {
            Some(semaphore) => *semaphore,
            None => {
                let semaphore = create_semaphore(device, SemaphoreKind::of(point.key))?;
                log::trace!("Created semaphore for {}", point);
                self.semaphores.insert(slot, semaphore);
                semaphore
            }
        };
        Ok((semaphore, semaphore_value(point)))
    }

    /// Number of live semaphores.
    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }

    /// Destroy every semaphore. The device must be idle.
    ///
    /// Recreated timeline semaphores start at zero, below the value of any
    /// generation signaled afterwards.
    pub fn destroy_all(&mut self, device: &ash::Device) {
        for (_, semaphore) in self.semaphores.drain() {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }
}

fn create_semaphore(device: &ash::Device, kind: SemaphoreKind) -> Result<vk::Semaphore, FrameError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(0);
    let mut create_info = vk::SemaphoreCreateInfo::default();
    if kind == SemaphoreKind::Timeline {
        create_info = create_info.push_next(&mut type_info);
    }
    unsafe { device.create_semaphore(&create_info, None) }
        .map_err(|e| convert_result(e, "Failed to create semaphore"))
}

/// Command buffers recorded for one domain.
pub type DomainCommands = Vec<(ExecutionDomain, vk::CommandBuffer)>;

/// A fenced submission whose command buffers are still in use.
///
/// A waiter thread blocks on the Vulkan fence and signals the frame's
/// [`Fence`] once the GPU is done.
#[derive(Debug)]
pub struct InFlight {
    fence: vk::Fence,
    waiter: Option<JoinHandle<()>>,
    commands: DomainCommands,
}

impl InFlight {
    /// Start waiting on `fence` and signal `frame_fence` when it completes.
    pub fn spawn(
        device: &ash::Device,
        fence: vk::Fence,
        frame_fence: Fence,
        commands: DomainCommands,
    ) -> Result<Self, FrameError> {
        let waiter_device = device.clone();
        let waiter = std::thread::Builder::new()
            .name("frame-fence".into())
            .spawn(move || {
                if let Err(e) = unsafe { waiter_device.wait_for_fences(&[fence], true, u64::MAX) } {
                    log::error!("Fence wait failed: {:?}", e);
                }
                frame_fence.signal();
            })
            .map_err(|e| FrameError::Internal(format!("Failed to spawn fence waiter: {}", e)))?;
        Ok(Self {
            fence,
            waiter: Some(waiter),
            commands,
        })
    }

    /// Whether the GPU finished the submission.
    pub fn is_finished(&self) -> bool {
        self.waiter.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Join the waiter and hand back the fence and command buffers.
    pub fn retire(mut self) -> (vk::Fence, DomainCommands) {
        if let Some(waiter) = self.waiter.take()
            && waiter.join().is_err()
        {
            log::error!("Fence waiter panicked");
        }
        (self.fence, std::mem::take(&mut self.commands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StageId;
    use rstest::rstest;

    fn point(key: SyncPointKey, generation: u64) -> SyncPointRef {
        SyncPointRef {
            key,
            index: 0,
            generation,
        }
    }

    #[rstest]
    #[case(SyncPointKey::ImageAvailable, SemaphoreKind::Binary)]
    #[case(SyncPointKey::RenderFinished, SemaphoreKind::Binary)]
    #[case(SyncPointKey::StageDone(StageId::LightSort), SemaphoreKind::Timeline)]
    fn test_semaphore_kind(#[case] key: SyncPointKey, #[case] kind: SemaphoreKind) {
        assert_eq!(SemaphoreKind::of(key), kind);
    }

    #[test]
    fn test_timeline_values_increase_with_generation() {
        let key = SyncPointKey::StageDone(StageId::BvhBuild);
        let values: Vec<u64> = (0..4).map(|g| semaphore_value(&point(key, g))).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(semaphore_value(&point(SyncPointKey::ImageAvailable, 9)), 0);
    }
}
