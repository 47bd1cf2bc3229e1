//! Checkpoint vote collection and stabilization.
//!
//! A checkpoint becomes stable when a quorum of replicas attested the
//! same application state value for its boundary AND this replica has
//! produced a matching local attestation. Stability is what licenses
//! truncation everywhere else; votes alone never do.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bft::collections::{self, HashMap, HashSet};
use crate::bft::message::NodeId;
use crate::bft::ordering::SeqNo;

#[derive(Default)]
struct CheckpointState {
    votes: HashMap<Vec<u8>, HashSet<NodeId>>,
    local: Option<Vec<u8>>,
    stable: bool,
}

impl CheckpointState {
    fn is_stable(&self, quorum: usize) -> bool {
        let local = match &self.local {
            Some(local) => local,
            None => return false,
        };
        self.votes
            .get(local)
            .map(|set| set.len() >= quorum)
            .unwrap_or(false)
    }
}

/// Collects checkpoint votes and drives the stable watermark.
pub struct CheckpointTracker {
    seqs: BTreeMap<SeqNo, CheckpointState>,
    last_stable: SeqNo,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self {
            seqs: BTreeMap::new(),
            last_stable: SeqNo::from(0),
        }
    }

    /// The highest stable checkpoint boundary. Monotone.
    pub fn last_stable(&self) -> SeqNo {
        self.last_stable
    }

    /// Records a vote. Returns true iff this vote newly made the
    /// checkpoint stable; the caller then runs the truncation cascade.
    pub fn apply_checkpoint_msg(
        &mut self,
        source: NodeId,
        seq_no: SeqNo,
        value: Vec<u8>,
        quorum: usize,
    ) -> bool {
        if seq_no <= self.last_stable {
            debug!(seq_no = u64::from(seq_no), "vote for concluded checkpoint");
            return false;
        }
        let state = self.seqs.entry(seq_no).or_default();
        if state.stable {
            return false;
        }
        state
            .votes
            .entry(value)
            .or_insert_with(collections::hash_set)
            .insert(source);
        if state.is_stable(quorum) {
            state.stable = true;
            true
        } else {
            false
        }
    }

    /// Records this replica's own attestation for `seq_no`. Returns
    /// true iff votes already collected now make the checkpoint
    /// stable.
    ///
    /// Stabilization is normally observed through the loopback copy of
    /// the broadcast this attestation travels in, but a replica late
    /// to checkpoint can find the quorum already waiting for it.
    pub fn apply_checkpoint_result(&mut self, seq_no: SeqNo, value: Vec<u8>, quorum: usize) -> bool {
        if seq_no <= self.last_stable {
            return false;
        }
        let state = self.seqs.entry(seq_no).or_default();
        if let Some(prev) = &state.local {
            if *prev != value {
                warn!(
                    seq_no = u64::from(seq_no),
                    "conflicting local checkpoint value"
                );
            }
            return false;
        }
        state.local = Some(value);
        if !state.stable && state.is_stable(quorum) {
            state.stable = true;
            true
        } else {
            false
        }
    }

    /// Drops vote state concluded by the stable checkpoint at
    /// `stable`, and advances the watermark.
    pub fn truncate(&mut self, stable: SeqNo) {
        if stable <= self.last_stable {
            return;
        }
        self.last_stable = stable;
        self.seqs = self.seqs.split_off(&stable);
    }

    /// (seq_no, strongest vote count, stable) per tracked boundary.
    pub fn summary(&self) -> Vec<(SeqNo, usize, bool)> {
        self.seqs
            .iter()
            .map(|(seq_no, state)| {
                let strongest = state.votes.values().map(|set| set.len()).max().unwrap_or(0);
                (*seq_no, strongest, state.stable)
            })
            .collect()
    }
}
