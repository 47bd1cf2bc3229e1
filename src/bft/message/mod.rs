//! Types for the messages traded between replicas of the system.
//!
//! The wire representation is a host concern; every type here derives
//! `serde` under the `serialize_serde` feature, and that is as far as
//! this crate goes. What is fixed here is the canonical byte layout of
//! the payloads that get hashed, since all replicas must agree on it.

use std::fmt;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use smallvec::SmallVec;

use crate::bft::crypto::hash::Digest;
use crate::bft::ordering::{Epoch, Orderable, ReqNo, SeqNo};

/// A `NodeId` represents the id of a replica in the BFT system.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct NodeId(u32);

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> NodeId {
        NodeId(id)
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> u32 {
        id.0
    }
}

impl From<NodeId> for u64 {
    #[inline]
    fn from(id: NodeId) -> u64 {
        id.0 as u64
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier attributed to a client of the replicated service.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClientId(#[cfg_attr(feature = "serialize_serde", serde(with = "serde_bytes"))] Vec<u8>);

impl ClientId {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self(id.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId(")?;
        for b in self.0.iter().take(8) {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// A request submitted by a client for ordering.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Request {
    pub client_id: ClientId,
    pub req_no: ReqNo,
    #[cfg_attr(feature = "serialize_serde", serde(with = "serde_bytes"))]
    pub data: Vec<u8>,
}

/// A replica's attestation that it holds a client request whose
/// payload hashes to `digest`.
///
/// Batches order acks rather than payloads; the payloads travel once,
/// in `ForwardRequest` messages or straight from the client.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct RequestAck {
    pub client_id: ClientId,
    pub req_no: ReqNo,
    pub digest: Digest,
}

/// Represents a message from the three-phase ordering sub-protocol.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ConsensusMessage {
    epoch: Epoch,
    seq: SeqNo,
    kind: ConsensusMessageKind,
}

/// Represents one of the three ordering phases.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ConsensusMessageKind {
    /// The bucket leader allocates a batch of request acks to a
    /// sequence number.
    Preprepare(Vec<RequestAck>),
    /// A replica vouches for the digest the pre-prepared batch
    /// hashed to.
    Prepare(Digest),
    /// A replica has seen a prepare quorum for the digest, and
    /// commits to it.
    Commit(Digest),
}

impl ConsensusMessage {
    /// Creates a new `ConsensusMessage` for slot `seq` of `epoch`.
    pub fn new(epoch: Epoch, seq: SeqNo, kind: ConsensusMessageKind) -> Self {
        Self { epoch, seq, kind }
    }

    /// The epoch this message belongs to.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns a reference to the consensus message kind.
    pub fn kind(&self) -> &ConsensusMessageKind {
        &self.kind
    }

    /// Returns the inner message kind, consuming the message.
    pub fn into_kind(self) -> ConsensusMessageKind {
        self.kind
    }
}

impl Orderable for ConsensusMessage {
    fn sequence_number(&self) -> SeqNo {
        self.seq
    }
}

/// An attestation of the application state at a checkpoint boundary.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Checkpoint {
    pub seq_no: SeqNo,
    #[cfg_attr(feature = "serialize_serde", serde(with = "serde_bytes"))]
    pub value: Vec<u8>,
}

/// Pre-prepare evidence carried in an `EpochChange`.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct QEntry {
    pub epoch: Epoch,
    pub seq_no: SeqNo,
    pub digest: Digest,
}

/// Prepare-quorum evidence carried in an `EpochChange`.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PEntry {
    pub epoch: Epoch,
    pub seq_no: SeqNo,
    pub digest: Digest,
}

/// A replica's evidence for entering a new epoch: its checkpoints,
/// and the per-slot prepare/pre-prepare state it accumulated since
/// its most recent stable checkpoint.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EpochChange {
    pub new_epoch: Epoch,
    pub checkpoints: Vec<Checkpoint>,
    pub p_set: Vec<PEntry>,
    pub q_set: Vec<QEntry>,
}

impl EpochChange {
    /// The canonical byte chunks of this message, fed to the host
    /// hasher to identify it during epoch change agreement.
    pub fn hash_chunks(&self) -> Chunks {
        let mut chunks = Chunks::new();
        chunks.push(u64::from(self.new_epoch).to_le_bytes().to_vec());
        for cp in &self.checkpoints {
            chunks.push(u64::from(cp.seq_no).to_le_bytes().to_vec());
            chunks.push(cp.value.clone());
        }
        for p in &self.p_set {
            chunks.push(u64::from(p.epoch).to_le_bytes().to_vec());
            chunks.push(u64::from(p.seq_no).to_le_bytes().to_vec());
            chunks.push(p.digest.as_ref().to_vec());
        }
        for q in &self.q_set {
            chunks.push(u64::from(q.epoch).to_le_bytes().to_vec());
            chunks.push(u64::from(q.seq_no).to_le_bytes().to_vec());
            chunks.push(q.digest.as_ref().to_vec());
        }
        chunks
    }
}

/// The configuration a new epoch starts from: the checkpoint it is
/// anchored at, and one entry per following slot, re-proposing a
/// prepared digest or proposing null.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NewEpochConfig {
    pub number: Epoch,
    pub starting_checkpoint: Checkpoint,
    pub final_preprepares: Vec<Option<Digest>>,
}

/// The new epoch configuration elected by the target epoch's primary,
/// along with the epoch change evidence it was derived from.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NewEpoch {
    pub config: NewEpochConfig,
    pub epoch_changes: Vec<(NodeId, EpochChange)>,
}

/// The tagged union of every message a replica can receive from a
/// peer. Dispatch is an exhaustive match, so a new message kind
/// cannot be forgotten anywhere.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum SystemMessage {
    Consensus(ConsensusMessage),
    Checkpoint(Checkpoint),
    RequestAck(RequestAck),
    ForwardRequest {
        request: Request,
        digest: Digest,
    },
    FetchBatch {
        seq_no: SeqNo,
        digest: Digest,
    },
    ForwardBatch {
        seq_no: SeqNo,
        digest: Digest,
        request_acks: Vec<RequestAck>,
    },
    Suspect {
        epoch: Epoch,
    },
    EpochChange(EpochChange),
    EpochChangeAck {
        new_epoch: Epoch,
        originator: NodeId,
        digest: Digest,
    },
    NewEpoch(NewEpoch),
    NewEpochEcho(NewEpochConfig),
    NewEpochReady(NewEpochConfig),
}

impl SystemMessage {
    /// A short label for log lines.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            SystemMessage::Consensus(m) => match m.kind() {
                ConsensusMessageKind::Preprepare(_) => "preprepare",
                ConsensusMessageKind::Prepare(_) => "prepare",
                ConsensusMessageKind::Commit(_) => "commit",
            },
            SystemMessage::Checkpoint(_) => "checkpoint",
            SystemMessage::RequestAck(_) => "requestack",
            SystemMessage::ForwardRequest { .. } => "forwardrequest",
            SystemMessage::FetchBatch { .. } => "fetchbatch",
            SystemMessage::ForwardBatch { .. } => "forwardbatch",
            SystemMessage::Suspect { .. } => "suspect",
            SystemMessage::EpochChange(_) => "epochchange",
            SystemMessage::EpochChangeAck { .. } => "epochchangeack",
            SystemMessage::NewEpoch(_) => "newepoch",
            SystemMessage::NewEpochEcho(_) => "newepochecho",
            SystemMessage::NewEpochReady(_) => "newepochready",
        }
    }
}

/// Byte chunks handed to the host hasher.
pub type Chunks = SmallVec<[Vec<u8>; 4]>;

/// The canonical chunks of a client request: client id, request
/// number, payload.
pub fn request_chunks(request: &Request) -> Chunks {
    let mut chunks = Chunks::new();
    chunks.push(request.client_id.as_bytes().to_vec());
    chunks.push(request.req_no.to_le_bytes().to_vec());
    chunks.push(request.data.clone());
    chunks
}

/// The canonical chunks of a batch of request acks.
pub fn batch_chunks(acks: &[RequestAck]) -> Chunks {
    let mut chunks = Chunks::new();
    for ack in acks {
        chunks.push(ack.client_id.as_bytes().to_vec());
        chunks.push(ack.req_no.to_le_bytes().to_vec());
        chunks.push(ack.digest.as_ref().to_vec());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::hash::digest_chunks;

    fn ack(req_no: ReqNo) -> RequestAck {
        let request = Request {
            client_id: ClientId::new(&b"client-a"[..]),
            req_no,
            data: vec![req_no as u8; 4],
        };
        RequestAck {
            client_id: request.client_id.clone(),
            req_no,
            digest: digest_chunks(request_chunks(&request).iter().map(Vec::as_slice)),
        }
    }

    #[test]
    fn test_batch_chunks_are_order_sensitive() {
        let forward = batch_chunks(&[ack(1), ack(2)]);
        let backward = batch_chunks(&[ack(2), ack(1)]);
        let d1 = digest_chunks(forward.iter().map(Vec::as_slice));
        let d2 = digest_chunks(backward.iter().map(Vec::as_slice));
        assert_ne!(d1, d2);
    }

    #[cfg(feature = "serialize_serde")]
    #[test]
    fn test_message_serde_round_trip() {
        let msg = SystemMessage::Consensus(ConsensusMessage::new(
            Epoch::from(1),
            SeqNo::from(42),
            ConsensusMessageKind::Preprepare(vec![ack(1), ack(2)]),
        ));
        let bytes = bincode::serialize(&msg).expect("serialize failed");
        let back: SystemMessage = bincode::deserialize(&bytes).expect("deserialize failed");
        assert_eq!(msg, back);
    }
}
