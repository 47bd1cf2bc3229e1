//! In-memory mirror of the replica's durable log.
//!
//! The host owns the bytes on disk; the state machine keeps this copy
//! so it can reconstruct epoch change evidence without asking for a
//! read back. Appends here always travel together with a `Persist`
//! action carrying the same entry.

use std::collections::BTreeMap;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::bft::message::{Checkpoint, EpochChange, NewEpochConfig, PEntry, QEntry};
use crate::bft::ordering::{Epoch, SeqNo};

/// An entry of the durable log.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Entry {
    /// A locally produced checkpoint attestation.
    Checkpoint(Checkpoint),
    /// A slot reached the pre-prepared state under some epoch.
    QEntry(QEntry),
    /// A slot reached the prepared state under some epoch.
    PEntry(PEntry),
    /// A new epoch configuration was installed.
    NewEpoch(NewEpochConfig),
}

impl Entry {
    fn seq_no(&self) -> SeqNo {
        match self {
            Entry::Checkpoint(cp) => cp.seq_no,
            Entry::QEntry(q) => q.seq_no,
            Entry::PEntry(p) => p.seq_no,
            Entry::NewEpoch(cfg) => cfg.starting_checkpoint.seq_no,
        }
    }
}

/// The append-only log, truncated at stable checkpoint boundaries.
pub struct PersistedLog {
    entries: Vec<Entry>,
}

impl PersistedLog {
    /// Creates a log anchored at the genesis checkpoint, so epoch
    /// change evidence always has a base to stand on.
    pub fn new() -> Self {
        let genesis = Entry::Checkpoint(Checkpoint {
            seq_no: SeqNo::from(0),
            value: Vec::new(),
        });
        Self {
            entries: vec![genesis],
        }
    }

    /// Appends an entry to the mirror.
    pub fn add(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Drops every entry concluded by the stable checkpoint at
    /// `stable`. The stable checkpoint itself is retained; it anchors
    /// the next epoch change.
    pub fn truncate(&mut self, stable: SeqNo) {
        self.entries.retain(|entry| match entry {
            Entry::Checkpoint(_) => entry.seq_no() >= stable,
            _ => entry.seq_no() > stable,
        });
    }

    /// Assembles this replica's evidence for moving to `new_epoch`:
    /// its checkpoints, and per slot the strongest prepare and the
    /// pre-prepares accumulated since the last stable checkpoint.
    ///
    /// Checkpoints are sorted by sequence number ascending, and the
    /// evidence sets by (sequence number, epoch), so two replicas with
    /// the same log produce the same message.
    pub fn construct_epoch_change(&self, new_epoch: Epoch) -> EpochChange {
        let mut checkpoints: BTreeMap<SeqNo, Checkpoint> = BTreeMap::new();
        let mut p_set: BTreeMap<SeqNo, PEntry> = BTreeMap::new();
        let mut q_set: BTreeMap<(SeqNo, Epoch), QEntry> = BTreeMap::new();

        for entry in &self.entries {
            match entry {
                Entry::Checkpoint(cp) => {
                    checkpoints.insert(cp.seq_no, cp.clone());
                }
                Entry::PEntry(p) => {
                    let keep = p_set
                        .get(&p.seq_no)
                        .map(|prev| p.epoch > prev.epoch)
                        .unwrap_or(true);
                    if keep {
                        p_set.insert(p.seq_no, *p);
                    }
                }
                Entry::QEntry(q) => {
                    q_set.insert((q.seq_no, q.epoch), *q);
                }
                Entry::NewEpoch(_) => (),
            }
        }

        EpochChange {
            new_epoch,
            checkpoints: checkpoints.into_values().collect(),
            p_set: p_set.into_values().collect(),
            q_set: q_set.into_values().collect(),
        }
    }

    /// The entries currently mirrored.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::hash::digest_chunks;

    fn digest(tag: u8) -> crate::bft::crypto::hash::Digest {
        digest_chunks([&[tag][..]])
    }

    fn checkpoint(seq_no: u64) -> Entry {
        Entry::Checkpoint(Checkpoint {
            seq_no: SeqNo::from(seq_no),
            value: vec![seq_no as u8],
        })
    }

    #[test]
    fn test_epoch_change_checkpoints_sorted() {
        let mut log = PersistedLog::new();
        log.add(checkpoint(40));
        log.add(checkpoint(20));

        let change = log.construct_epoch_change(Epoch::from(2));
        let seqs: Vec<_> = change
            .checkpoints
            .iter()
            .map(|cp| u64::from(cp.seq_no))
            .collect();
        assert_eq!(seqs, vec![0, 20, 40]);
    }

    #[test]
    fn test_epoch_change_keeps_strongest_prepare() {
        let mut log = PersistedLog::new();
        log.add(Entry::PEntry(PEntry {
            epoch: Epoch::from(1),
            seq_no: SeqNo::from(3),
            digest: digest(1),
        }));
        log.add(Entry::PEntry(PEntry {
            epoch: Epoch::from(2),
            seq_no: SeqNo::from(3),
            digest: digest(2),
        }));

        let change = log.construct_epoch_change(Epoch::from(3));
        assert_eq!(change.p_set.len(), 1);
        assert_eq!(change.p_set[0].epoch, Epoch::from(2));
        assert_eq!(change.p_set[0].digest, digest(2));
    }

    #[test]
    fn test_truncate_retains_stable_checkpoint() {
        let mut log = PersistedLog::new();
        log.add(Entry::QEntry(QEntry {
            epoch: Epoch::from(1),
            seq_no: SeqNo::from(5),
            digest: digest(5),
        }));
        log.add(checkpoint(20));
        log.add(Entry::QEntry(QEntry {
            epoch: Epoch::from(1),
            seq_no: SeqNo::from(21),
            digest: digest(21),
        }));

        log.truncate(SeqNo::from(20));

        assert_eq!(log.entries().len(), 2);
        assert!(matches!(
            log.entries()[0],
            Entry::Checkpoint(Checkpoint { seq_no, .. }) if seq_no == SeqNo::from(20)
        ));
        assert!(matches!(
            log.entries()[1],
            Entry::QEntry(QEntry { seq_no, .. }) if seq_no == SeqNo::from(21)
        ));
    }
}
