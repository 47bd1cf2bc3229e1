//! Selects ready client requests into proposed batches for the
//! buckets this replica leads.
//!
//! A request becomes ready once its payload and digest are known and
//! its request number sits inside the client's window. Ready requests
//! are drawn in `(client id, request number)` order, so every honest
//! leader with the same inputs builds the same batches. Requests are
//! assigned to buckets by the residue of their digest, which is what
//! spreads proposal authority across leaders without overlap.

use std::collections::BTreeMap;

use crate::bft::actions::Actions;
use crate::bft::clients::{ClientWindow, ClientWindows};
use crate::bft::collections::{self, OrderedMap};
use crate::bft::message::{
    ClientId,
    ConsensusMessage,
    ConsensusMessageKind,
    RequestAck,
    SystemMessage,
};
use crate::bft::ordering::{Epoch, ReqNo, SeqNo};

type Pending = BTreeMap<(ClientId, ReqNo), RequestAck>;

/// The proposer of one active epoch.
pub struct Proposer {
    batch_size: usize,
    heartbeat_ticks: u32,
    buckets: u64,
    /// Buckets this replica leads, ascending.
    owned: Vec<u64>,
    /// Next unproposed sequence number per owned bucket.
    next_assigned: BTreeMap<u64, SeqNo>,
    /// Ready requests per owned bucket.
    pending: BTreeMap<u64, Pending>,
    /// Per client, the next request number to examine.
    cursors: OrderedMap<ClientId, ReqNo>,
    idle_ticks: u32,
}

impl Proposer {
    /// Creates a proposer owning `owned` buckets, proposing sequence
    /// numbers strictly above `floor`.
    pub fn new(
        batch_size: usize,
        heartbeat_ticks: u32,
        buckets: u64,
        owned: Vec<u64>,
        floor: SeqNo,
    ) -> Self {
        let base = u64::from(floor) + 1;
        let next_assigned = owned
            .iter()
            .map(|&bucket| {
                let skew = (bucket + buckets - base % buckets) % buckets;
                (bucket, SeqNo::from(base + skew))
            })
            .collect();
        let pending = owned.iter().map(|&bucket| (bucket, Pending::new())).collect();
        Self {
            batch_size,
            heartbeat_ticks,
            buckets,
            owned,
            next_assigned,
            pending,
            cursors: collections::ordered_map(),
            idle_ticks: 0,
        }
    }

    /// Pulls newly ready requests of `client` into the owned buckets'
    /// pending sets. Called whenever the client's window gains a
    /// payload, an ack, or slides forward.
    pub fn step_client_window(&mut self, client: &ClientId, window: &ClientWindow) {
        let (low, high) = window.watermarks();
        let mut cursor = self.cursors.get(client).copied().unwrap_or(1).max(low);
        while cursor <= high {
            if window.is_committed(cursor) {
                // ordered under a previous epoch; nothing to re-propose
                cursor += 1;
                continue;
            }
            let digest = match window.allocated_digest(cursor) {
                Some(digest) => digest,
                None => break,
            };
            let bucket = digest.prefix_u64() % self.buckets;
            if let Some(pending) = self.pending.get_mut(&bucket) {
                pending.insert(
                    (client.clone(), cursor),
                    RequestAck {
                        client_id: client.clone(),
                        req_no: cursor,
                        digest,
                    },
                );
            }
            cursor += 1;
        }
        self.cursors.insert(client.clone(), cursor);
    }

    /// Proposes every batch the window currently admits. With `force`,
    /// each owned bucket additionally proposes one empty batch if it
    /// has nothing pending, keeping the window moving (heartbeat).
    pub fn drain(
        &mut self,
        epoch: Epoch,
        high: SeqNo,
        clients: &ClientWindows,
        force: bool,
    ) -> Actions {
        let mut actions = Actions::new();
        for index in 0..self.owned.len() {
            let bucket = self.owned[index];
            loop {
                let seq_no = match self.next_assigned.get(&bucket) {
                    Some(&seq_no) if seq_no <= high => seq_no,
                    _ => break,
                };
                let batch = self.draw(bucket);
                if batch.is_empty() && !force {
                    break;
                }
                for ack in &batch {
                    self.forward_request(&mut actions, clients, ack);
                }
                // the loopback copy of this broadcast is what hashes
                // the batch, leader and follower alike
                actions.send_all(SystemMessage::Consensus(ConsensusMessage::new(
                    epoch,
                    seq_no,
                    ConsensusMessageKind::Preprepare(batch.clone()),
                )));
                self.next_assigned
                    .insert(bucket, SeqNo::from(u64::from(seq_no) + self.buckets));
                self.idle_ticks = 0;
                if batch.is_empty() {
                    // one heartbeat proposal per bucket is plenty
                    break;
                }
            }
        }
        actions
    }

    fn draw(&mut self, bucket: u64) -> Vec<RequestAck> {
        let pending = match self.pending.get_mut(&bucket) {
            Some(pending) => pending,
            None => return Vec::new(),
        };
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let key = match pending.keys().next() {
                Some(key) => key.clone(),
                None => break,
            };
            if let Some(ack) = pending.remove(&key) {
                batch.push(ack);
            }
        }
        batch
    }

    fn forward_request(&self, actions: &mut Actions, clients: &ClientWindows, ack: &RequestAck) {
        let request = clients
            .window(&ack.client_id)
            .and_then(|w| w.request_data(ack.req_no));
        if let Some(request) = request {
            actions.send_all(SystemMessage::ForwardRequest {
                request: request.clone(),
                digest: ack.digest,
            });
        }
    }

    /// Advances the heartbeat counter. Returns true when the owned
    /// buckets went `heartbeat_ticks` ticks without a proposal and a
    /// forced drain is due.
    pub fn tick(&mut self) -> bool {
        if self.owned.is_empty() {
            return false;
        }
        self.idle_ticks += 1;
        self.idle_ticks >= self.heartbeat_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::clients::ClientWindows;
    use crate::bft::crypto::hash::digest_chunks;
    use crate::bft::message::{request_chunks, Request};

    const BUCKETS: u64 = 4;

    fn allocate(clients: &mut ClientWindows, client: &ClientId, req_no: ReqNo) {
        let request = Request {
            client_id: client.clone(),
            req_no,
            data: vec![req_no as u8],
        };
        let digest = digest_chunks(request_chunks(&request).iter().map(Vec::as_slice));
        assert!(clients.window_mut(client).allocate(request, digest));
    }

    fn proposer_owning_all() -> Proposer {
        Proposer::new(2, 4, BUCKETS, vec![0, 1, 2, 3], SeqNo::from(0))
    }

    #[test]
    fn test_next_assigned_respects_residues() {
        let proposer = Proposer::new(1, 4, BUCKETS, vec![0, 2], SeqNo::from(5));
        assert_eq!(proposer.next_assigned[&0], SeqNo::from(8));
        assert_eq!(proposer.next_assigned[&2], SeqNo::from(6));
    }

    #[test]
    fn test_draw_order_and_batch_cap() {
        let mut clients = ClientWindows::new();
        let client = ClientId::new(&b"c"[..]);
        for req_no in 1..=5 {
            allocate(&mut clients, &client, req_no);
        }

        let mut proposer = proposer_owning_all();
        proposer.step_client_window(&client, clients.window(&client).expect("window exists"));

        let actions = proposer.drain(Epoch::from(1), SeqNo::from(100), &clients, false);

        let mut proposed = Vec::new();
        for msg in &actions.broadcast {
            if let SystemMessage::Consensus(c) = msg {
                if let ConsensusMessageKind::Preprepare(acks) = c.kind() {
                    assert!(acks.len() <= 2);
                    proposed.extend(acks.iter().map(|a| a.req_no));
                }
            }
        }
        // all five drawn, each exactly once, per-bucket order ascending
        proposed.sort_unstable();
        assert_eq!(proposed, vec![1, 2, 3, 4, 5]);

        // nothing left to propose
        let actions = proposer.drain(Epoch::from(1), SeqNo::from(100), &clients, false);
        assert!(actions.broadcast.is_empty());
    }

    #[test]
    fn test_forced_drain_proposes_empty_batches() {
        let clients = ClientWindows::new();
        let mut proposer = Proposer::new(2, 4, BUCKETS, vec![1], SeqNo::from(0));

        let actions = proposer.drain(Epoch::from(1), SeqNo::from(100), &clients, true);
        let preprepares: Vec<_> = actions
            .broadcast
            .iter()
            .filter_map(|msg| match msg {
                SystemMessage::Consensus(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(preprepares.len(), 1);
        assert!(matches!(
            preprepares[0].kind(),
            ConsensusMessageKind::Preprepare(acks) if acks.is_empty()
        ));
    }

    #[test]
    fn test_heartbeat_counter() {
        let mut proposer = Proposer::new(2, 3, BUCKETS, vec![0], SeqNo::from(0));
        assert!(!proposer.tick());
        assert!(!proposer.tick());
        assert!(proposer.tick());

        // non-leaders never heartbeat
        let mut follower = Proposer::new(2, 1, BUCKETS, vec![], SeqNo::from(0));
        assert!(!follower.tick());
    }
}
