//! The actions a replica hands back to its host, and the results the
//! host feeds back in.
//!
//! Every operation of the state machine returns an [`Actions`] value;
//! nothing is sent, hashed or persisted in place. The host carries the
//! batch out in any order it likes, except that hash results and
//! checkpoint results must come back through `process_results`.

use crate::bft::crypto::hash::Digest;
use crate::bft::message::{
    Chunks,
    NodeId,
    Request,
    RequestAck,
    SystemMessage,
};
use crate::bft::ordering::{Epoch, SeqNo};
use crate::bft::persisted::Entry;

/// A batch of requests delivered to the application at a slot.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CommitEntry {
    pub seq_no: SeqNo,
    pub batch: Vec<RequestAck>,
}

/// Work the host performs with its hasher on behalf of the replica.
///
/// The purpose travels with the request and comes back attached to
/// the digest, so `process_results` knows where to route it.
#[derive(Clone, Debug)]
pub struct HashRequest {
    pub data: Chunks,
    pub purpose: HashPurpose,
}

/// What a requested digest is for.
#[derive(Clone, Debug)]
pub enum HashPurpose {
    /// The digest of a pre-prepared batch of request acks.
    Batch {
        epoch: Epoch,
        seq_no: SeqNo,
        acks: Vec<RequestAck>,
    },
    /// The digest of a request this replica took from its client.
    Request { request: Request },
    /// Recomputes the digest of a forwarded request, to be checked
    /// against the digest its forwarder claimed.
    VerifyRequest {
        source: NodeId,
        request: Request,
        expected: Digest,
    },
    /// Identifies a peer's epoch change message during epoch
    /// change agreement.
    EpochChange {
        originator: NodeId,
        new_epoch: Epoch,
    },
    /// Recomputes the digest of a forwarded batch, to be checked
    /// against the digest it was fetched under.
    VerifyBatch {
        source: NodeId,
        seq_no: SeqNo,
        expected: Digest,
        acks: Vec<RequestAck>,
    },
}

/// A digest computed by the host, echoing the request it answers.
#[derive(Clone, Debug)]
pub struct HashResult {
    pub request: HashRequest,
    pub digest: Digest,
}

/// An application state attestation computed by the host for a
/// checkpoint boundary.
#[derive(Clone, Debug)]
pub struct CheckpointResult {
    pub seq_no: SeqNo,
    pub value: Vec<u8>,
}

/// Externally computed results, fed back through `process_results`.
#[derive(Clone, Debug, Default)]
pub struct ActionResults {
    pub digests: Vec<HashResult>,
    pub checkpoints: Vec<CheckpointResult>,
}

/// The side effects requested by one operation of the state machine.
///
/// `Actions` is a value: operations build their own and the caller
/// appends it into the batch it will eventually return to the host.
#[derive(Clone, Debug, Default)]
pub struct Actions {
    /// Messages to send to every replica, this one included.
    pub broadcast: Vec<SystemMessage>,
    /// Messages to send to a single replica.
    pub unicast: Vec<(NodeId, SystemMessage)>,
    /// Digests to compute.
    pub hash: Vec<HashRequest>,
    /// Entries to append to the durable log.
    pub persist: Vec<Entry>,
    /// Batches to deliver to the application, in slot order.
    pub commit: Vec<CommitEntry>,
    /// Checkpoint boundaries the host should attest the application
    /// state for.
    pub checkpoint: Vec<SeqNo>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves every action of `other` into this batch, preserving
    /// relative order.
    pub fn append(&mut self, other: Actions) {
        let Actions {
            mut broadcast,
            mut unicast,
            mut hash,
            mut persist,
            mut commit,
            mut checkpoint,
        } = other;
        self.broadcast.append(&mut broadcast);
        self.unicast.append(&mut unicast);
        self.hash.append(&mut hash);
        self.persist.append(&mut persist);
        self.commit.append(&mut commit);
        self.checkpoint.append(&mut checkpoint);
    }

    /// Whether this batch requests no work at all.
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty()
            && self.unicast.is_empty()
            && self.hash.is_empty()
            && self.persist.is_empty()
            && self.commit.is_empty()
            && self.checkpoint.is_empty()
    }

    pub(crate) fn send_all(&mut self, msg: SystemMessage) {
        self.broadcast.push(msg);
    }

    pub(crate) fn send_one(&mut self, target: NodeId, msg: SystemMessage) {
        self.unicast.push((target, msg));
    }

    pub(crate) fn request_hash(&mut self, data: Chunks, purpose: HashPurpose) {
        self.hash.push(HashRequest { data, purpose });
    }

    pub(crate) fn record(&mut self, entry: Entry) {
        self.persist.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::message::{Checkpoint, SystemMessage};
    use crate::bft::ordering::SeqNo;

    #[test]
    fn test_append_preserves_order() {
        let cp = |seq_no: u64| {
            SystemMessage::Checkpoint(Checkpoint {
                seq_no: SeqNo::from(seq_no),
                value: vec![],
            })
        };

        let mut first = Actions::new();
        first.send_all(cp(1));
        let mut second = Actions::new();
        second.send_all(cp(2));
        second.send_all(cp(3));

        first.append(second);
        let seqs: Vec<_> = first
            .broadcast
            .iter()
            .map(|m| match m {
                SystemMessage::Checkpoint(c) => u64::from(c.seq_no),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_empty() {
        assert!(Actions::new().is_empty());
    }
}
