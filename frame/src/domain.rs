//! Execution domains.
//!
//! The frame core schedules work onto exactly two hardware execution
//! contexts: the [`Primary`](ExecutionDomain::Primary) graphics-capable queue
//! and the [`Async`](ExecutionDomain::Async) compute queue. Which physical
//! queues back those domains is decided once at device bootstrap and
//! described by a [`DomainMap`].
//!
//! # Topologies
//!
//! | Topology | Primary | Async | Ownership transfers |
//! |----------|---------|-------|---------------------|
//! | [`GeneralOnly`](QueueTopology::GeneralOnly) | general queue | same queue | memory barriers only |
//! | [`GeneralAndAsync`](QueueTopology::GeneralAndAsync) | general queue | compute queue | release/acquire pairs when families differ |

use std::fmt;

/// A hardware execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecutionDomain {
    /// Graphics-capable queue. Runs G-buffer fill, cluster build and composition.
    Primary,
    /// Asynchronous compute queue. Runs light copy, sort and BVH build.
    Async,
}

impl ExecutionDomain {
    /// Both domains, in index order.
    pub const ALL: [ExecutionDomain; 2] = [ExecutionDomain::Primary, ExecutionDomain::Async];

    /// Dense index for per-domain arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Async => 1,
        }
    }

    /// The other domain.
    pub fn other(self) -> Self {
        match self {
            Self::Primary => Self::Async,
            Self::Async => Self::Primary,
        }
    }
}

impl fmt::Display for ExecutionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// How the two domains map onto hardware queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueTopology {
    /// Both domains submit to the single general queue.
    GeneralOnly,
    /// The async domain has its own queue (possibly in another family).
    #[default]
    GeneralAndAsync,
}

/// A hardware queue: family index plus queue index within the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueRef {
    /// Queue family index.
    pub family: u32,
    /// Queue index within the family.
    pub index: u32,
}

impl QueueRef {
    /// Create a new queue reference.
    pub fn new(family: u32, index: u32) -> Self {
        Self { family, index }
    }
}

/// Resolved mapping from execution domains to hardware queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainMap {
    topology: QueueTopology,
    queues: [QueueRef; 2],
}

impl DomainMap {
    /// Both domains on the same general queue.
    pub fn general_only(general: QueueRef) -> Self {
        Self {
            topology: QueueTopology::GeneralOnly,
            queues: [general, general],
        }
    }

    /// Primary on `general`, async on `compute`.
    ///
    /// # Panics
    ///
    /// Panics if both refer to the same queue; use [`general_only`](Self::general_only).
    pub fn general_and_async(general: QueueRef, compute: QueueRef) -> Self {
        assert!(
            general != compute,
            "general_and_async requires two distinct queues"
        );
        Self {
            topology: QueueTopology::GeneralAndAsync,
            queues: [general, compute],
        }
    }

    /// The configured topology.
    pub fn topology(&self) -> QueueTopology {
        self.topology
    }

    /// Queue backing a domain.
    pub fn queue(&self, domain: ExecutionDomain) -> QueueRef {
        self.queues[domain.index()]
    }

    /// Queue family backing a domain.
    pub fn family(&self, domain: ExecutionDomain) -> u32 {
        self.queue(domain).family
    }

    /// Whether moving a resource between the two domains needs a queue family
    /// ownership transfer (a release/acquire barrier pair).
    pub fn needs_family_transfer(&self, from: ExecutionDomain, to: ExecutionDomain) -> bool {
        from != to && self.family(from) != self.family(to)
    }
}

impl Default for DomainMap {
    fn default() -> Self {
        Self::general_only(QueueRef::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_index_and_other() {
        assert_eq!(ExecutionDomain::Primary.index(), 0);
        assert_eq!(ExecutionDomain::Async.index(), 1);
        assert_eq!(ExecutionDomain::Primary.other(), ExecutionDomain::Async);
        assert_eq!(ExecutionDomain::Async.other(), ExecutionDomain::Primary);
    }

    #[test]
    fn test_general_only_never_transfers() {
        let map = DomainMap::general_only(QueueRef::new(0, 0));
        assert_eq!(map.topology(), QueueTopology::GeneralOnly);
        assert!(!map.needs_family_transfer(ExecutionDomain::Primary, ExecutionDomain::Async));
    }

    #[test]
    fn test_distinct_families_transfer() {
        let map = DomainMap::general_and_async(QueueRef::new(0, 0), QueueRef::new(2, 0));
        assert!(map.needs_family_transfer(ExecutionDomain::Primary, ExecutionDomain::Async));
        assert!(map.needs_family_transfer(ExecutionDomain::Async, ExecutionDomain::Primary));
        assert!(!map.needs_family_transfer(ExecutionDomain::Async, ExecutionDomain::Async));
    }

    #[test]
    fn test_second_queue_same_family_has_no_family_transfer() {
        let map = DomainMap::general_and_async(QueueRef::new(0, 0), QueueRef::new(0, 1));
        assert_eq!(map.topology(), QueueTopology::GeneralAndAsync);
        assert!(!map.needs_family_transfer(ExecutionDomain::Primary, ExecutionDomain::Async));
    }

    #[test]
    #[should_panic(expected = "requires two distinct queues")]
    fn test_general_and_async_same_queue_panics() {
        DomainMap::general_and_async(QueueRef::new(0, 0), QueueRef::new(0, 0));
    }
}
