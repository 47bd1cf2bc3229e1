//! A deterministic, in-process multi-replica harness.
//!
//! The engine plays the host for a whole group: it delivers broadcast
//! and unicast actions over FIFO wires, services hash and checkpoint
//! requests inline with the crate's own hasher, and mirrors each
//! replica's durable log and delivered batches. Nothing here touches
//! a clock or a thread, so a scenario runs the same way every time;
//! the integration tests below lean on that.

use std::collections::VecDeque;

use crate::bft::actions::{
    ActionResults,
    Actions,
    CheckpointResult,
    CommitEntry,
    HashResult,
};
use crate::bft::core::{NetworkConfig, ReplicaConfig, StateMachine, Status};
use crate::bft::crypto::hash::{digest_chunks, Context};
use crate::bft::error::*;
use crate::bft::message::{NodeId, Request, SystemMessage};
use crate::bft::ordering::SeqNo;
use crate::bft::persisted::Entry;

struct Replica {
    sm: StateMachine,
    committed: Vec<CommitEntry>,
    persisted: Vec<Entry>,
}

/// A deterministic cluster of replicas plus their host plumbing.
pub struct Engine {
    network: NetworkConfig,
    replicas: Vec<Replica>,
    /// In-flight messages: (target, source, payload), FIFO.
    wires: VecDeque<(NodeId, NodeId, SystemMessage)>,
}

impl Engine {
    /// Boots one replica per node of `network`. `configure` maps a
    /// node id to its replica tuning.
    pub fn new(
        network: NetworkConfig,
        configure: impl Fn(NodeId) -> ReplicaConfig,
    ) -> Result<Self> {
        let mut replicas = Vec::with_capacity(network.n());
        for &id in network.nodes() {
            let sm = StateMachine::new(network.clone(), configure(id))?;
            replicas.push(Replica {
                sm,
                committed: Vec::new(),
                persisted: Vec::new(),
            });
        }
        Ok(Self {
            network,
            replicas,
            wires: VecDeque::new(),
        })
    }

    fn index_of(&self, id: NodeId) -> usize {
        self.network
            .nodes()
            .iter()
            .position(|&node| node == id)
            .unwrap_or_else(|| unreachable!("engine only wires configured nodes"))
    }

    /// Submits a client request the way clients do: to every replica.
    /// Runs the cluster to quiescence.
    pub fn submit(&mut self, request: Request) -> Result<()> {
        for index in 0..self.replicas.len() {
            let actions = self.replicas[index].sm.propose(request.clone());
            self.dispatch(index, actions)?;
        }
        self.run()
    }

    /// Ticks every replica once, then runs to quiescence.
    pub fn tick_all(&mut self) -> Result<()> {
        for index in 0..self.replicas.len() {
            let actions = self.replicas[index].sm.tick();
            self.dispatch(index, actions)?;
        }
        self.run()
    }

    /// Injects a message onto the wire, e.g. to play a byzantine or
    /// faulty peer. Delivered on the next `run`.
    pub fn deliver(&mut self, target: NodeId, source: NodeId, msg: SystemMessage) {
        self.wires.push_back((target, source, msg));
    }

    /// Drains the wires until no message is in flight.
    pub fn run(&mut self) -> Result<()> {
        while let Some((target, source, msg)) = self.wires.pop_front() {
            let index = self.index_of(target);
            let actions = self.replicas[index].sm.step(source, msg)?;
            self.dispatch(index, actions)?;
        }
        Ok(())
    }

    /// Carries out one replica's action batch: queues its sends,
    /// mirrors its persistence and deliveries, and answers its hash
    /// and checkpoint requests inline.
    fn dispatch(&mut self, index: usize, actions: Actions) -> Result<()> {
        let mut pending = VecDeque::new();
        pending.push_back(actions);
        while let Some(actions) = pending.pop_front() {
            let my_id = self.network.nodes()[index];
            for msg in actions.broadcast {
                for &target in self.network.nodes() {
                    self.wires.push_back((target, my_id, msg.clone()));
                }
            }
            for (target, msg) in actions.unicast {
                self.wires.push_back((target, my_id, msg));
            }
            for entry in actions.persist {
                self.replicas[index].persisted.push(entry);
            }
            for commit in actions.commit {
                self.replicas[index].committed.push(commit);
            }

            let mut results = ActionResults::default();
            for request in actions.hash {
                let digest = digest_chunks(request.data.iter().map(Vec::as_slice));
                results.digests.push(HashResult { request, digest });
            }
            for seq_no in actions.checkpoint {
                results.checkpoints.push(CheckpointResult {
                    seq_no,
                    value: self.checkpoint_value(index, seq_no),
                });
            }
            if !results.digests.is_empty() || !results.checkpoints.is_empty() {
                let more = self.replicas[index].sm.process_results(results)?;
                pending.push_back(more);
            }
        }
        Ok(())
    }

    /// The application state attestation: a digest of the committed
    /// prefix up to `seq_no`. Deliveries are in slot order, so every
    /// honest replica computes the same value.
    fn checkpoint_value(&self, index: usize, seq_no: SeqNo) -> Vec<u8> {
        let mut ctx = Context::new();
        ctx.update(&u64::from(seq_no).to_le_bytes());
        for entry in &self.replicas[index].committed {
            if entry.seq_no <= seq_no {
                for ack in &entry.batch {
                    ctx.update(ack.digest.as_ref());
                }
            }
        }
        ctx.finish().as_ref().to_vec()
    }

    /// The batches `id` has delivered, in delivery order.
    pub fn committed(&self, id: NodeId) -> &[CommitEntry] {
        &self.replicas[self.index_of(id)].committed
    }

    /// Everything `id` ever asked to persist, untruncated. A real
    /// host prunes this by the stable checkpoints it persists; the
    /// truncated view lives in the replica itself.
    pub fn persisted(&self, id: NodeId) -> &[Entry] {
        &self.replicas[self.index_of(id)].persisted
    }

    /// Read access to a replica's automaton.
    pub fn replica(&self, id: NodeId) -> &StateMachine {
        &self.replicas[self.index_of(id)].sm
    }

    /// A status snapshot of `id`.
    pub fn status(&self, id: NodeId) -> Status {
        self.replicas[self.index_of(id)].sm.status()
    }

    /// The node ids driven by this engine.
    pub fn node_ids(&self) -> &[NodeId] {
        self.network.nodes()
    }
}
