//! Front/back selection for the double-buffered light sort output.
//!
//! The sort pass writes one instance of the light output while culling and
//! composition read the other. The selector toggles once per sort phase,
//! independent of how often frames are presented. Before a sort starts it
//! is aligned with [`DoubleBuffer::align_for`] so the last phase never
//! writes the instance consumed by the previous frame, whatever the phase
//! count.

use std::fmt;

/// One of the two instances of a double-buffered resource set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferSet {
    /// First instance.
    #[default]
    Front,
    /// Second instance.
    Back,
}

impl BufferSet {
    /// Dense index (0 for front, 1 for back).
    pub fn index(self) -> usize {
        match self {
            Self::Front => 0,
            Self::Back => 1,
        }
    }

    /// The other instance.
    pub fn other(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl fmt::Display for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Front => write!(f, "front"),
            Self::Back => write!(f, "back"),
        }
    }
}

/// Selector deciding which instance the next sort phase writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoubleBuffer {
    write: BufferSet,
    toggles: u64,
}

impl DoubleBuffer {
    /// Create a selector writing the front set first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance the next phase writes.
    pub fn current_write_set(&self) -> BufferSet {
        self.write
    }

    /// Instance written by the most recent phase, read by the next phase and
    /// by consumers once the sort pass finished.
    pub fn read_set(&self) -> BufferSet {
        self.write.other()
    }

    /// Flip the selector.
    pub fn toggle(&mut self) -> BufferSet {
        self.write = self.write.other();
        self.toggles += 1;
        self.write
    }

    /// Prepare for a run of `phases` phases that each toggle once, so the
    /// last phase writes the instance opposite the current read set.
    ///
    /// Returns whether an extra toggle was needed.
    pub fn align_for(&mut self, phases: usize) -> bool {
        if phases == 0 {
            return false;
        }
        let last = if phases % 2 == 1 {
            self.write
        } else {
            self.write.other()
        };
        let misaligned = last == self.read_set();
        if misaligned {
            self.toggle();
        }
        misaligned
    }

    /// Number of toggles since creation.
    pub fn toggle_count(&self) -> u64 {
        self.toggles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    #[case(7)]
    #[case(128)]
    fn test_toggles_return_to_front_iff_even(#[case] toggles: u32) {
        let mut buffer = DoubleBuffer::new();
        for _ in 0..toggles {
            buffer.toggle();
        }
        assert_eq!(
            buffer.current_write_set() == BufferSet::Front,
            toggles % 2 == 0
        );
        assert_eq!(buffer.toggle_count(), toggles as u64);
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[case(8)]
    fn test_aligned_runs_alternate_output(#[case] phases: usize) {
        let mut buffer = DoubleBuffer::new();
        let mut previous = buffer.read_set();
        for _ in 0..4 {
            buffer.align_for(phases);
            for _ in 0..phases {
                buffer.toggle();
            }
            assert_ne!(buffer.read_set(), previous);
            previous = buffer.read_set();
        }
    }

    #[test]
    fn test_align_toggles_only_for_even_runs() {
        let mut buffer = DoubleBuffer::new();
        assert!(!buffer.align_for(0));
        assert!(!buffer.align_for(3));
        assert!(buffer.align_for(4));
        assert_eq!(buffer.toggle_count(), 1);
    }

    #[test]
    fn test_read_set_is_last_written() {
        let mut buffer = DoubleBuffer::new();
        let written = buffer.current_write_set();
        buffer.toggle();
        assert_eq!(buffer.read_set(), written);
        assert_ne!(buffer.current_write_set(), written);
    }
}
