//! Sequence and epoch counters, and the windowed ordering helpers
//! shared by the sub-protocols.

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use either::{Either, Left, Right};

/// Represents a protocol slot attributed to a batch of client
/// requests by the ordering protocol.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct SeqNo(u64);

/// A configuration interval, during which a fixed leader to bucket
/// assignment is in effect.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Epoch(u64);

/// Per-client request counter.
pub type ReqNo = u64;

/// Why a value fell outside a watermark window.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum OutOfWindow {
    /// Below the window; the value refers to work already concluded.
    Small,
    /// Beyond the window; the value refers to work not yet admissible.
    Big,
}

impl From<u64> for SeqNo {
    #[inline]
    fn from(seq_no: u64) -> SeqNo {
        SeqNo(seq_no)
    }
}

impl From<SeqNo> for u64 {
    #[inline]
    fn from(seq_no: SeqNo) -> u64 {
        seq_no.0
    }
}

impl SeqNo {
    /// Returns the following sequence number.
    #[inline]
    pub fn next(self) -> SeqNo {
        SeqNo(self.0 + 1)
    }

    /// The bucket residue class this sequence number belongs to.
    #[inline]
    pub fn bucket(self, buckets: u64) -> u64 {
        self.0 % buckets
    }

    /// Whether this sequence number sits on a checkpoint boundary.
    #[inline]
    pub fn on_checkpoint(self, interval: u64) -> bool {
        self.0 != 0 && self.0 % interval == 0
    }
}

impl From<u64> for Epoch {
    #[inline]
    fn from(epoch: u64) -> Epoch {
        Epoch(epoch)
    }
}

impl From<Epoch> for u64 {
    #[inline]
    fn from(epoch: Epoch) -> u64 {
        epoch.0
    }
}

impl Epoch {
    /// Returns the following epoch number.
    #[inline]
    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

/// Types whose position in the global order is given by a sequence
/// number.
pub trait Orderable {
    /// Returns the sequence number of this value.
    fn sequence_number(&self) -> SeqNo;
}

/// Locates `value` within the window of `width` values starting at
/// `low`, returning an index fit for addressing window slots.
///
/// Values outside the window tell the caller whether the work they
/// refer to is already concluded (`Small`) or not yet admissible
/// (`Big`), which is the distinction the admission queues need to
/// choose between dropping and holding a message.
#[inline]
pub(crate) fn window_index(value: u64, low: u64, width: u64) -> Either<OutOfWindow, usize> {
    if value < low {
        Left(OutOfWindow::Small)
    } else if value - low >= width {
        Left(OutOfWindow::Big)
    } else {
        Right((value - low) as usize)
    }
}

#[cfg(test)]
mod tests {
    use either::{Left, Right};

    use super::*;

    #[test]
    fn test_window_index() {
        assert_eq!(window_index(0, 1, 100), Left(OutOfWindow::Small));
        assert_eq!(window_index(1, 1, 100), Right(0));
        assert_eq!(window_index(100, 1, 100), Right(99));
        assert_eq!(window_index(101, 1, 100), Left(OutOfWindow::Big));
    }

    #[test]
    fn test_buckets_partition_seq_nos() {
        let buckets = 4;
        for raw in 1..=32u64 {
            let seq = SeqNo::from(raw);
            assert_eq!(seq.bucket(buckets), raw % buckets);
        }
    }

    #[test]
    fn test_checkpoint_boundaries() {
        assert!(!SeqNo::from(0).on_checkpoint(5));
        assert!(!SeqNo::from(4).on_checkpoint(5));
        assert!(SeqNo::from(5).on_checkpoint(5));
        assert!(SeqNo::from(20).on_checkpoint(5));
    }
}
