//! Tracks the batches of request acks referenced by pre-prepares, and
//! fetches the ones this replica is missing.
//!
//! Batches are keyed by digest; a seq-no index drives truncation at
//! stable checkpoints. A batch learned through a `ForwardBatch` is
//! only trusted after its digest has been recomputed by the host.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bft::actions::{Actions, HashPurpose};
use crate::bft::collections::{self, HashMap};
use crate::bft::crypto::hash::Digest;
use crate::bft::message::{batch_chunks, NodeId, RequestAck, SystemMessage};
use crate::bft::ordering::SeqNo;

/// A batch of request acks pinned at a slot.
///
/// The same digest can be pinned at several slots (every empty batch
/// hashes alike); `seq_no` tracks the highest of them, so truncation
/// only forgets a batch once nothing above the boundary refers to it.
pub struct BatchEntry {
    pub seq_no: SeqNo,
    pub acks: Vec<RequestAck>,
}

/// The replica's store of known batches and in-flight fetches.
pub struct BatchTracker {
    batches: HashMap<Digest, BatchEntry>,
    by_seq: BTreeMap<SeqNo, Vec<Digest>>,
    fetches: HashMap<Digest, SeqNo>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self {
            batches: collections::hash_map(),
            by_seq: BTreeMap::new(),
            fetches: collections::hash_map(),
        }
    }

    /// The authoritative insert, called with locally digested batches.
    pub fn add_batch(&mut self, seq_no: SeqNo, digest: Digest, acks: Vec<RequestAck>) {
        self.fetches.remove(&digest);
        match self.batches.get_mut(&digest) {
            Some(entry) => {
                if seq_no <= entry.seq_no {
                    return;
                }
                entry.seq_no = seq_no;
            }
            None => {
                self.batches.insert(digest, BatchEntry { seq_no, acks });
            }
        }
        self.by_seq.entry(seq_no).or_default().push(digest);
    }

    pub fn has_batch(&self, digest: &Digest) -> bool {
        self.batches.contains_key(digest)
    }

    pub fn batch(&self, digest: &Digest) -> Option<&BatchEntry> {
        self.batches.get(digest)
    }

    /// Asks the network for a batch this replica is missing. The
    /// fetch stays in flight until a verified `ForwardBatch` lands.
    pub fn fetch_batch(&mut self, seq_no: SeqNo, digest: Digest) -> Actions {
        let mut actions = Actions::new();
        if self.batches.contains_key(&digest) || self.fetches.contains_key(&digest) {
            return actions;
        }
        self.fetches.insert(digest, seq_no);
        actions.send_all(SystemMessage::FetchBatch { seq_no, digest });
        actions
    }

    /// Whether any fetch is still waiting for a verified reply.
    pub fn has_fetch_in_flight(&self) -> bool {
        !self.fetches.is_empty()
    }

    /// Answers a peer's `FetchBatch`, if the batch is known.
    pub fn reply_fetch_batch(&self, source: NodeId, seq_no: SeqNo, digest: Digest) -> Actions {
        let mut actions = Actions::new();
        match self.batches.get(&digest) {
            Some(entry) => {
                actions.send_one(
                    source,
                    SystemMessage::ForwardBatch {
                        seq_no: entry.seq_no,
                        digest,
                        request_acks: entry.acks.clone(),
                    },
                );
            }
            None => {
                debug!(seq_no = u64::from(seq_no), "fetch for unknown batch");
            }
        }
        actions
    }

    /// A peer forwarded a batch; have the host recompute its digest
    /// before trusting it. Unsolicited forwards are dropped.
    pub fn apply_forward_batch(
        &mut self,
        source: NodeId,
        seq_no: SeqNo,
        digest: Digest,
        acks: Vec<RequestAck>,
    ) -> Actions {
        let mut actions = Actions::new();
        if !self.fetches.contains_key(&digest) {
            debug!(
                source = u64::from(source),
                "forwarded batch without a pending fetch"
            );
            return actions;
        }
        let data = batch_chunks(&acks);
        actions.request_hash(
            data,
            HashPurpose::VerifyBatch {
                source,
                seq_no,
                expected: digest,
                acks,
            },
        );
        actions
    }

    /// The host recomputed a forwarded batch's digest. On a match the
    /// batch is stored and its fetch concluded; a mismatch leaves the
    /// fetch in flight for an honest peer to answer.
    pub fn apply_verify_batch_result(
        &mut self,
        digest: Digest,
        source: NodeId,
        seq_no: SeqNo,
        expected: Digest,
        acks: Vec<RequestAck>,
    ) -> bool {
        if digest != expected {
            warn!(
                source = u64::from(source),
                "forwarded batch digest mismatch"
            );
            return false;
        }
        self.add_batch(seq_no, digest, acks);
        true
    }

    /// Drops batches pinned below `below`. Callers keep one
    /// checkpoint interval of slack for epoch change evidence. A
    /// digest also pinned at a higher slot survives.
    pub fn truncate(&mut self, below: SeqNo) {
        let kept = self.by_seq.split_off(&below);
        let dropped = std::mem::replace(&mut self.by_seq, kept);
        for (_, digests) in dropped {
            for digest in digests {
                let gone = self
                    .batches
                    .get(&digest)
                    .map(|entry| entry.seq_no < below)
                    .unwrap_or(false);
                if gone {
                    self.batches.remove(&digest);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::hash::digest_chunks;
    use crate::bft::message::ClientId;

    fn batch(seq_no: u64) -> (SeqNo, Digest, Vec<RequestAck>) {
        let acks = vec![RequestAck {
            client_id: ClientId::new(&b"c"[..]),
            req_no: seq_no,
            digest: digest_chunks([&seq_no.to_le_bytes()[..]]),
        }];
        let digest = digest_chunks(batch_chunks(&acks).iter().map(Vec::as_slice));
        (SeqNo::from(seq_no), digest, acks)
    }

    #[test]
    fn test_reply_when_known() {
        let mut tracker = BatchTracker::new();
        let (seq_no, digest, acks) = batch(3);
        tracker.add_batch(seq_no, digest, acks);

        let actions = tracker.reply_fetch_batch(NodeId::from(2), seq_no, digest);
        assert_eq!(actions.unicast.len(), 1);
        let (target, msg) = &actions.unicast[0];
        assert_eq!(*target, NodeId::from(2));
        assert!(matches!(msg, SystemMessage::ForwardBatch { .. }));

        let (_, unknown, _) = batch(4);
        let actions = tracker.reply_fetch_batch(NodeId::from(2), SeqNo::from(4), unknown);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_fetch_and_forward_flow() {
        let mut tracker = BatchTracker::new();
        let (seq_no, digest, acks) = batch(7);

        let actions = tracker.fetch_batch(seq_no, digest);
        assert_eq!(actions.broadcast.len(), 1);
        assert!(tracker.has_fetch_in_flight());

        // a second fetch for the same digest is silent
        assert!(tracker.fetch_batch(seq_no, digest).is_empty());

        let actions = tracker.apply_forward_batch(NodeId::from(1), seq_no, digest, acks.clone());
        assert_eq!(actions.hash.len(), 1);

        assert!(tracker.apply_verify_batch_result(digest, NodeId::from(1), seq_no, digest, acks));
        assert!(tracker.has_batch(&digest));
        assert!(!tracker.has_fetch_in_flight());
    }

    #[test]
    fn test_unsolicited_forward_dropped() {
        let mut tracker = BatchTracker::new();
        let (seq_no, digest, acks) = batch(9);
        let actions = tracker.apply_forward_batch(NodeId::from(1), seq_no, digest, acks);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_shared_digest_survives_truncation() {
        // every empty batch hashes to the same digest
        let empty: Vec<RequestAck> = Vec::new();
        let digest = digest_chunks(batch_chunks(&empty).iter().map(Vec::as_slice));

        let mut tracker = BatchTracker::new();
        tracker.add_batch(SeqNo::from(2), digest, empty.clone());
        tracker.add_batch(SeqNo::from(12), digest, empty);

        tracker.truncate(SeqNo::from(10));
        assert!(tracker.has_batch(&digest));

        tracker.truncate(SeqNo::from(15));
        assert!(!tracker.has_batch(&digest));
    }

    #[test]
    fn test_truncation() {
        let mut tracker = BatchTracker::new();
        let mut digests = Vec::new();
        for seq_no in [10u64, 20, 30] {
            let (seq_no, digest, acks) = batch(seq_no);
            tracker.add_batch(seq_no, digest, acks);
            digests.push(digest);
        }

        tracker.truncate(SeqNo::from(20));

        assert!(!tracker.has_batch(&digests[0]));
        assert!(tracker.has_batch(&digests[1]));
        assert!(tracker.has_batch(&digests[2]));
    }
}
