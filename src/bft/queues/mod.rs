//! Per-sender admission queues.
//!
//! Messages from one peer apply in arrival order, but only when the
//! replica is ready for them: consensus votes wait for their epoch,
//! watermark window and local digest, checkpoints for their vicinity
//! of the stable watermark. A blocked head holds that sender's queue
//! without delaying any other sender, which preserves per-sender FIFO
//! while letting the rest of the system make progress.

use std::collections::VecDeque;

use either::{Left, Right};
use tracing::debug;

use crate::bft::clients::ClientWindows;
use crate::bft::epoch::ActiveEpoch;
use crate::bft::message::{
    ConsensusMessageKind,
    NodeId,
    SystemMessage,
};
use crate::bft::ordering::{self, Orderable, OutOfWindow, SeqNo};

/// A read-only view of the replica state deciding which queued
/// messages are currently admissible. Rebuilt by the façade on every
/// drain pass, so queues never hold stale references to protocol
/// state.
pub struct AdmissionGate<'a> {
    pub epoch: Option<&'a ActiveEpoch>,
    pub clients: &'a ClientWindows,
    pub last_stable: SeqNo,
    pub high_watermark: SeqNo,
    pub checkpoint_interval: u64,
}

enum Admission {
    /// Pop and apply.
    Admit,
    /// Keep at the head; something has to change first.
    Block,
    /// Pop and discard; the message refers to concluded work.
    Stale,
}

/// The arrival-order queue of one sender.
pub struct NodeMsgQueue {
    id: NodeId,
    queue: VecDeque<SystemMessage>,
}

impl NodeMsgQueue {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            queue: VecDeque::new(),
        }
    }

    /// Appends a freshly received message.
    pub fn ingest(&mut self, msg: SystemMessage) {
        self.queue.push_back(msg);
    }

    /// Pops the next admissible message, discarding stale ones on the
    /// way. Returns `None` when the queue is empty or its head is
    /// blocked.
    pub fn next(&mut self, gate: &AdmissionGate<'_>) -> Option<SystemMessage> {
        loop {
            let head = self.queue.front()?;
            match Self::admission(head, gate) {
                Admission::Admit => return self.queue.pop_front(),
                Admission::Block => return None,
                Admission::Stale => {
                    debug!(
                        source = u64::from(self.id),
                        kind = head.label(),
                        "discarding stale message"
                    );
                    self.queue.pop_front();
                }
            }
        }
    }

    /// How many messages are waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    fn admission(msg: &SystemMessage, gate: &AdmissionGate<'_>) -> Admission {
        match msg {
            SystemMessage::Consensus(consensus) => {
                let epoch = match gate.epoch {
                    Some(epoch) => epoch,
                    // between epochs; consensus holds until a new
                    // epoch is installed
                    None => return Admission::Block,
                };
                if consensus.epoch() < epoch.number() {
                    return Admission::Stale;
                }
                if consensus.epoch() > epoch.number() {
                    return Admission::Block;
                }
                let seq_no = consensus.sequence_number();
                let low = u64::from(epoch.low_watermark());
                let width = u64::from(gate.high_watermark) - low;
                match ordering::window_index(u64::from(seq_no), low + 1, width) {
                    Left(OutOfWindow::Small) => return Admission::Stale,
                    Left(OutOfWindow::Big) => return Admission::Block,
                    Right(_) => (),
                }
                match consensus.kind() {
                    ConsensusMessageKind::Preprepare(acks) => {
                        // every referenced request payload must be
                        // locally known before the batch can be hashed
                        let ready = acks.iter().all(|ack| {
                            gate.clients
                                .window(&ack.client_id)
                                .map(|w| w.has_request(ack.req_no, &ack.digest))
                                .unwrap_or(false)
                        });
                        if ready {
                            Admission::Admit
                        } else {
                            Admission::Block
                        }
                    }
                    ConsensusMessageKind::Prepare(_) | ConsensusMessageKind::Commit(_) => {
                        if epoch.digest_known(seq_no) {
                            Admission::Admit
                        } else {
                            Admission::Block
                        }
                    }
                }
            }
            SystemMessage::Checkpoint(cp) => {
                let interval = gate.checkpoint_interval;
                let floor = u64::from(gate.last_stable).saturating_sub(interval);
                let ceiling = u64::from(gate.high_watermark) + interval;
                let seq_no = u64::from(cp.seq_no);
                if seq_no < floor {
                    Admission::Stale
                } else if seq_no > ceiling {
                    Admission::Block
                } else {
                    Admission::Admit
                }
            }
            // client traffic, fetches, and the epoch change
            // sub-protocol are admitted unconditionally
            SystemMessage::RequestAck(_)
            | SystemMessage::ForwardRequest { .. }
            | SystemMessage::FetchBatch { .. }
            | SystemMessage::ForwardBatch { .. }
            | SystemMessage::Suspect { .. }
            | SystemMessage::EpochChange(_)
            | SystemMessage::EpochChangeAck { .. }
            | SystemMessage::NewEpoch(_)
            | SystemMessage::NewEpochEcho(_)
            | SystemMessage::NewEpochReady(_) => Admission::Admit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::core::{NetworkConfig, ReplicaConfig};
    use crate::bft::crypto::hash::digest_chunks;
    use crate::bft::epoch::ActiveEpoch;
    use crate::bft::message::{
        batch_chunks,
        Checkpoint,
        ClientId,
        ConsensusMessage,
        RequestAck,
    };
    use crate::bft::oddities::Oddities;
    use crate::bft::ordering::Epoch;

    fn network() -> NetworkConfig {
        NetworkConfig::new((0..4).map(NodeId::from).collect(), 4, 5, 4)
    }

    fn replica(id: u32) -> ReplicaConfig {
        ReplicaConfig {
            id: NodeId::from(id),
            batch_size: 2,
            heartbeat_ticks: 2,
            suspect_ticks: 4,
            new_epoch_timeout_ticks: 8,
        }
    }

    fn consensus(epoch: u64, seq_no: u64, kind: ConsensusMessageKind) -> SystemMessage {
        SystemMessage::Consensus(ConsensusMessage::new(
            Epoch::from(epoch),
            SeqNo::from(seq_no),
            kind,
        ))
    }

    struct Fixture {
        network: NetworkConfig,
        epoch: ActiveEpoch,
        clients: ClientWindows,
    }

    impl Fixture {
        fn new() -> Self {
            let network = network();
            let epoch = ActiveEpoch::new(
                network.epoch_config(Epoch::from(1)),
                &network,
                &replica(0),
                SeqNo::from(0),
            );
            Self {
                network,
                epoch,
                clients: ClientWindows::new(),
            }
        }

        fn gate(&self) -> AdmissionGate<'_> {
            AdmissionGate {
                epoch: Some(&self.epoch),
                clients: &self.clients,
                last_stable: SeqNo::from(0),
                high_watermark: self.epoch.high_watermark(&self.network),
                checkpoint_interval: self.network.checkpoint_interval(),
            }
        }
    }

    #[test]
    fn test_fifo_hold_without_reorder() {
        let mut fix = Fixture::new();
        let digest = digest_chunks([&b"d"[..]]);
        let mut queue = NodeMsgQueue::new(NodeId::from(3));

        // a prepare for an undigested slot blocks the head, and the
        // admissible checkpoint behind it must wait its turn
        queue.ingest(consensus(1, 1, ConsensusMessageKind::Prepare(digest)));
        queue.ingest(SystemMessage::Checkpoint(Checkpoint {
            seq_no: SeqNo::from(5),
            value: vec![],
        }));

        assert!(queue.next(&fix.gate()).is_none());
        assert_eq!(queue.len(), 2);

        // digest the slot; the queue releases in ingest order
        let seq_no = SeqNo::from(1);
        let leader = fix
            .epoch
            .config()
            .bucket_leader(seq_no.bucket(fix.network.buckets()));
        let acks: Vec<RequestAck> = Vec::new();
        let batch_digest = digest_chunks(batch_chunks(&acks).iter().map(Vec::as_slice));
        let mut oddities = Oddities::new();
        fix.epoch
            .apply_preprepare(leader, seq_no, acks, &fix.network, &mut oddities);
        fix.epoch
            .apply_batch_digest(seq_no, batch_digest, &fix.network);

        // note the queued prepare carries a different digest; the
        // queue only gates on digest *knowledge*, matching is the
        // epoch's business
        let released = queue.next(&fix.gate());
        assert!(matches!(
            released,
            Some(SystemMessage::Consensus(c)) if matches!(c.kind(), ConsensusMessageKind::Prepare(_))
        ));
        let released = queue.next(&fix.gate());
        assert!(matches!(released, Some(SystemMessage::Checkpoint(_))));
        assert!(queue.next(&fix.gate()).is_none());
    }

    #[test]
    fn test_stale_epoch_discarded_future_epoch_blocks() {
        let fix = Fixture::new();
        let digest = digest_chunks([&b"d"[..]]);
        let mut queue = NodeMsgQueue::new(NodeId::from(2));

        queue.ingest(consensus(0, 1, ConsensusMessageKind::Commit(digest)));
        assert!(queue.next(&fix.gate()).is_none());
        // the stale message was dropped on the way
        assert_eq!(queue.len(), 0);

        queue.ingest(consensus(2, 1, ConsensusMessageKind::Commit(digest)));
        assert!(queue.next(&fix.gate()).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_preprepare_blocks_until_requests_known() {
        let mut fix = Fixture::new();
        let client = ClientId::new(&b"c"[..]);
        let request = crate::bft::message::Request {
            client_id: client.clone(),
            req_no: 1,
            data: vec![7],
        };
        let digest = digest_chunks(
            crate::bft::message::request_chunks(&request)
                .iter()
                .map(Vec::as_slice),
        );
        let acks = vec![RequestAck {
            client_id: client.clone(),
            req_no: 1,
            digest,
        }];

        let seq_no = SeqNo::from(1);
        let leader = fix
            .epoch
            .config()
            .bucket_leader(seq_no.bucket(fix.network.buckets()));
        let mut queue = NodeMsgQueue::new(leader);
        queue.ingest(consensus(1, 1, ConsensusMessageKind::Preprepare(acks)));

        assert!(queue.next(&fix.gate()).is_none());

        fix.clients.window_mut(&client).allocate(request, digest);
        assert!(queue.next(&fix.gate()).is_some());
    }

    #[test]
    fn test_checkpoint_vicinity() {
        let fix = Fixture::new();
        let mut queue = NodeMsgQueue::new(NodeId::from(1));
        let checkpoint = |seq_no: u64| {
            SystemMessage::Checkpoint(Checkpoint {
                seq_no: SeqNo::from(seq_no),
                value: vec![],
            })
        };

        // high watermark is 15, so 15 + I = 20 still admits and
        // anything beyond blocks
        queue.ingest(checkpoint(20));
        assert!(queue.next(&fix.gate()).is_some());
        queue.ingest(checkpoint(25));
        assert!(queue.next(&fix.gate()).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_no_active_epoch_blocks_consensus_only() {
        let fix = Fixture::new();
        let digest = digest_chunks([&b"d"[..]]);
        let gate = AdmissionGate {
            epoch: None,
            clients: &fix.clients,
            last_stable: SeqNo::from(0),
            high_watermark: SeqNo::from(15),
            checkpoint_interval: fix.network.checkpoint_interval(),
        };

        let mut queue = NodeMsgQueue::new(NodeId::from(1));
        queue.ingest(consensus(1, 1, ConsensusMessageKind::Commit(digest)));
        queue.ingest(SystemMessage::Suspect {
            epoch: Epoch::from(1),
        });

        // consensus holds, but nothing reorders around it for this
        // sender; other senders' suspects flow independently
        assert!(queue.next(&gate).is_none());

        let mut other = NodeMsgQueue::new(NodeId::from(2));
        other.ingest(SystemMessage::Suspect {
            epoch: Epoch::from(1),
        });
        assert!(matches!(
            other.next(&gate),
            Some(SystemMessage::Suspect { .. })
        ));
    }
}
