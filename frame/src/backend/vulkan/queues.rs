//! Queue family selection.

use ash::vk;

use crate::domain::{DomainMap, QueueRef, QueueTopology};
use crate::error::FrameError;

/// Map the execution domains onto the queue families of a device.
///
/// The primary domain needs a family with graphics and compute. For the
/// async domain a dedicated compute family (no graphics) is preferred, then
/// a second queue of the general family. Without either, both domains share
/// the general queue.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    topology: QueueTopology,
) -> Result<DomainMap, FrameError> {
    let general_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    let general_family = families
        .iter()
        .position(|f| f.queue_flags.contains(general_flags) && f.queue_count > 0)
        .ok_or_else(|| {
            FrameError::NoSuitableQueue(
                "no queue family supports both graphics and compute".to_string(),
            )
        })? as u32;
    let general = QueueRef::new(general_family, 0);

    if topology == QueueTopology::GeneralOnly {
        log::info!("Queue topology: general only (family {})", general_family);
        return Ok(DomainMap::general_only(general));
    }

    let dedicated = families.iter().position(|f| {
        f.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && f.queue_count > 0
    });
    if let Some(family) = dedicated {
        log::info!(
            "Queue topology: general family {}, dedicated compute family {}",
            general_family,
            family
        );
        return Ok(DomainMap::general_and_async(
            general,
            QueueRef::new(family as u32, 0),
        ));
    }

    if families[general_family as usize].queue_count > 1 {
        log::info!(
            "Queue topology: two queues of general family {}",
            general_family
        );
        return Ok(DomainMap::general_and_async(
            general,
            QueueRef::new(general_family, 1),
        ));
    }

    log::warn!("No async compute queue available, running both domains on the general queue");
    Ok(DomainMap::general_only(general))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionDomain;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    const GENERAL: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::COMPUTE.as_raw(),
    );

    #[test]
    fn test_prefers_dedicated_compute_family() {
        let families = [
            family(GENERAL | vk::QueueFlags::TRANSFER, 16),
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
        ];
        let map = select_queue_families(&families, QueueTopology::GeneralAndAsync).unwrap();
        assert_eq!(map.topology(), QueueTopology::GeneralAndAsync);
        assert_eq!(map.family(ExecutionDomain::Async), 2);
        assert!(map.needs_family_transfer(ExecutionDomain::Primary, ExecutionDomain::Async));
    }

    #[test]
    fn test_second_general_queue() {
        let families = [family(GENERAL, 2)];
        let map = select_queue_families(&families, QueueTopology::GeneralAndAsync).unwrap();
        assert_eq!(map.queue(ExecutionDomain::Async), QueueRef::new(0, 1));
        assert!(!map.needs_family_transfer(ExecutionDomain::Primary, ExecutionDomain::Async));
    }

    #[test]
    fn test_falls_back_to_general_only() {
        let families = [family(GENERAL, 1)];
        let map = select_queue_families(&families, QueueTopology::GeneralAndAsync).unwrap();
        assert_eq!(map.topology(), QueueTopology::GeneralOnly);
    }

    #[test]
    fn test_requested_general_only() {
        let families = [family(GENERAL, 1), family(vk::QueueFlags::COMPUTE, 1)];
        let map = select_queue_families(&families, QueueTopology::GeneralOnly).unwrap();
        assert_eq!(map.topology(), QueueTopology::GeneralOnly);
    }

    #[test]
    fn test_no_general_family() {
        let families = [family(vk::QueueFlags::COMPUTE, 4)];
        let err = select_queue_families(&families, QueueTopology::GeneralAndAsync).unwrap_err();
        assert!(matches!(err, FrameError::NoSuitableQueue(_)));
    }
}
