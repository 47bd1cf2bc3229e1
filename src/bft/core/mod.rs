//! The replica state machine: one pure automaton dispatching external
//! events to the sub-protocols and aggregating the actions they emit.
//!
//! The host owns every side effect. It feeds protocol messages in
//! through [`StateMachine::step`], client requests through
//! [`StateMachine::propose`], completed work through
//! [`StateMachine::process_results`] and time through
//! [`StateMachine::tick`]; each call returns the batch of actions the
//! event provoked. Two replicas fed the same ordered events emit the
//! same ordered actions.

use intmap::IntMap;
use tracing::debug;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::bft::actions::{ActionResults, Actions, HashPurpose, HashResult};
use crate::bft::batches::BatchTracker;
use crate::bft::checkpoints::CheckpointTracker;
use crate::bft::clients::ClientWindows;
use crate::bft::crypto::hash::Digest;
use crate::bft::epoch::{ActiveEpoch, EpochConfig, SeqPhase, CHECKPOINT_WINDOWS};
use crate::bft::epoch_change::{EpochChanger, TargetState};
use crate::bft::error::*;
use crate::bft::message::{
    request_chunks,
    Checkpoint,
    ClientId,
    ConsensusMessageKind,
    NodeId,
    Request,
    RequestAck,
    SystemMessage,
};
use crate::bft::oddities::{Oddities, OddityCounts};
use crate::bft::ordering::{Epoch, Orderable, ReqNo, SeqNo};
use crate::bft::persisted::{Entry, PersistedLog};
use crate::bft::queues::{AdmissionGate, NodeMsgQueue};

/// Static description of the replica group. Immutable for a run.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NetworkConfig {
    nodes: Vec<NodeId>,
    buckets: u64,
    checkpoint_interval: u64,
    max_epoch_skip: u64,
}

impl NetworkConfig {
    /// Describes a group of `nodes` partitioning sequence numbers
    /// over `buckets`, checkpointing every `checkpoint_interval`
    /// slots, and refusing epoch changes that skip further than
    /// `max_epoch_skip` ahead.
    pub fn new(
        nodes: Vec<NodeId>,
        buckets: u64,
        checkpoint_interval: u64,
        max_epoch_skip: u64,
    ) -> Self {
        Self {
            nodes,
            buckets,
            checkpoint_interval,
            max_epoch_skip,
        }
    }

    /// A conventional configuration for `n` replicas: ids `0..n`, one
    /// bucket per replica, checkpoints every five slots.
    pub fn standard(n: u32) -> Self {
        Self::new((0..n).map(NodeId::from).collect(), n as u64, 5, 10)
    }

    /// The replica ids, ascending.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The number of replicas.
    pub fn n(&self) -> usize {
        self.nodes.len()
    }

    /// The number of byzantine replicas tolerated.
    pub fn f(&self) -> usize {
        (self.n() - 1) / 3
    }

    /// An intersection quorum: `2f + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// A weak quorum: `f + 1`, guaranteed to contain an honest
    /// replica.
    pub fn weak_quorum(&self) -> usize {
        self.f() + 1
    }

    pub fn buckets(&self) -> u64 {
        self.buckets
    }

    pub fn checkpoint_interval(&self) -> u64 {
        self.checkpoint_interval
    }

    pub fn max_epoch_skip(&self) -> u64 {
        self.max_epoch_skip
    }

    /// The primary of `epoch`, which elects its configuration during
    /// epoch change.
    pub fn primary(&self, epoch: Epoch) -> NodeId {
        self.nodes[(u64::from(epoch) % self.n() as u64) as usize]
    }

    /// The leader to bucket assignment of `epoch`: the node list
    /// rotated by the epoch number, so a faulty leader loses its
    /// buckets on the next epoch.
    pub fn epoch_config(&self, number: Epoch) -> EpochConfig {
        let n = self.n() as u64;
        let shift = u64::from(number) % n;
        let leaders = (0..n)
            .map(|index| self.nodes[((index + shift) % n) as usize])
            .collect();
        EpochConfig { number, leaders }
    }
}

/// Per-replica tuning.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ReplicaConfig {
    /// This replica's id in the group.
    pub id: NodeId,
    /// Most requests drawn into one proposed batch.
    pub batch_size: usize,
    /// Ticks an owned bucket may sit idle before an empty batch is
    /// proposed to keep the window moving.
    pub heartbeat_ticks: u32,
    /// Ticks of stalled in-flight slots before this replica suspects
    /// the epoch.
    pub suspect_ticks: u32,
    /// Ticks an epoch change may take before escalating to the next
    /// epoch number.
    pub new_epoch_timeout_ticks: u32,
}

/// The replica automaton.
pub struct StateMachine {
    config: ReplicaConfig,
    network: NetworkConfig,
    queues: IntMap<NodeMsgQueue>,
    oddities: Oddities,
    clients: ClientWindows,
    batches: BatchTracker,
    checkpoints: CheckpointTracker,
    persisted: PersistedLog,
    epoch_changer: EpochChanger,
    active: Option<ActiveEpoch>,
    /// The highest slot handed to the application.
    delivered: SeqNo,
}

impl StateMachine {
    /// Boots a replica at the genesis checkpoint, with epoch 1
    /// installed straight from configuration. The initial assignment
    /// is fixed, so there is nothing to agree on yet.
    pub fn new(network: NetworkConfig, config: ReplicaConfig) -> Result<Self> {
        if !network.nodes.contains(&config.id) {
            return Err("replica id missing from the node set").wrapped(ErrorKind::Core);
        }
        if network.buckets == 0 || network.checkpoint_interval == 0 {
            return Err("degenerate network configuration").wrapped(ErrorKind::Core);
        }

        let mut queues = IntMap::new();
        for &node in network.nodes() {
            queues.insert(u64::from(node), NodeMsgQueue::new(node));
        }

        let initial = Epoch::from(1);
        let active = ActiveEpoch::new(
            network.epoch_config(initial),
            &network,
            &config,
            SeqNo::from(0),
        );

        Ok(Self {
            epoch_changer: EpochChanger::new(config.id, initial),
            config,
            network,
            queues,
            oddities: Oddities::new(),
            clients: ClientWindows::new(),
            batches: BatchTracker::new(),
            checkpoints: CheckpointTracker::new(),
            persisted: PersistedLog::new(),
            active: Some(active),
            delivered: SeqNo::from(0),
        })
    }

    /// Takes a request from this replica's client: schedules its
    /// digest. Everything else follows from the hash result.
    pub fn propose(&mut self, request: Request) -> Actions {
        let mut actions = Actions::new();
        actions.request_hash(request_chunks(&request), HashPurpose::Request { request });
        actions
    }

    /// Admits a message from `source` and drains every queue to its
    /// fixed point.
    pub fn step(&mut self, source: NodeId, msg: SystemMessage) -> Result<Actions> {
        match self.queues.get_mut(u64::from(source)) {
            Some(queue) => queue.ingest(msg),
            None => {
                return Err("message from a replica outside the configuration")
                    .wrapped(ErrorKind::Core)
            }
        }
        let actions = self.drain()?;
        Ok(self.finish(actions))
    }

    /// Applies host-computed results, then drains.
    pub fn process_results(&mut self, results: ActionResults) -> Result<Actions> {
        let mut actions = Actions::new();

        for cp in results.checkpoints {
            let newly_stable = self.checkpoints.apply_checkpoint_result(
                cp.seq_no,
                cp.value.clone(),
                self.network.quorum(),
            );
            let checkpoint = Checkpoint {
                seq_no: cp.seq_no,
                value: cp.value,
            };
            let entry = Entry::Checkpoint(checkpoint.clone());
            self.persisted.add(entry.clone());
            actions.record(entry);
            actions.send_all(SystemMessage::Checkpoint(checkpoint));
            if newly_stable {
                actions.append(self.stabilize(cp.seq_no));
            }
        }

        for HashResult { request, digest } in results.digests {
            match request.purpose {
                HashPurpose::Batch {
                    epoch,
                    seq_no,
                    acks,
                } => {
                    self.batches.add_batch(seq_no, digest, acks);
                    if let Some(active) = self.active.as_mut() {
                        if active.number() == epoch {
                            actions.append(active.apply_batch_digest(
                                seq_no,
                                digest,
                                &self.network,
                            ));
                        }
                    }
                }
                HashPurpose::Request { request } => {
                    actions.send_all(SystemMessage::RequestAck(RequestAck {
                        client_id: request.client_id.clone(),
                        req_no: request.req_no,
                        digest,
                    }));
                    actions.append(self.apply_digested_request(digest, request));
                }
                HashPurpose::VerifyRequest {
                    source,
                    request,
                    expected,
                } => {
                    if digest != expected {
                        return Err(format!(
                            "byzantine: node {} forwarded request with a false digest",
                            source,
                        ))
                        .wrapped(ErrorKind::Core);
                    }
                    self.clients
                        .window_mut(&request.client_id)
                        .ack(source, request.req_no, digest);
                    actions.append(self.apply_digested_request(digest, request));
                    if self.epoch_changer.is_fetching() {
                        actions.append(
                            self.epoch_changer
                                .fetch_new_epoch_state(&self.network, &mut self.batches),
                        );
                    }
                }
                HashPurpose::EpochChange {
                    originator,
                    new_epoch,
                } => {
                    actions.append(self.epoch_changer.apply_epoch_change_digest(
                        originator,
                        new_epoch,
                        digest,
                    ));
                }
                HashPurpose::VerifyBatch {
                    source,
                    seq_no,
                    expected,
                    acks,
                } => {
                    self.batches
                        .apply_verify_batch_result(digest, source, seq_no, expected, acks);
                    if !self.batches.has_fetch_in_flight() && self.epoch_changer.is_fetching() {
                        actions.append(
                            self.epoch_changer
                                .fetch_new_epoch_state(&self.network, &mut self.batches),
                        );
                    }
                }
            }
        }

        actions.append(self.maybe_install_epoch());
        actions.append(self.drain()?);
        Ok(self.finish(actions))
    }

    /// Advances the active epoch's and the epoch changer's timers.
    pub fn tick(&mut self) -> Actions {
        let mut actions = Actions::new();
        if let Some(active) = self.active.as_mut() {
            actions.append(active.tick(&self.network, &self.clients, self.config.suspect_ticks));
        }
        actions.append(self.epoch_changer.tick(
            &self.network,
            &self.persisted,
            self.config.new_epoch_timeout_ticks,
        ));
        self.finish(actions)
    }

    /// A read-only snapshot for observation and testing.
    pub fn status(&self) -> Status {
        let (low_watermark, high_watermark) = match &self.active {
            Some(active) => (active.low_watermark(), active.high_watermark(&self.network)),
            None => (self.checkpoints.last_stable(), self.high_watermark()),
        };
        let sequences = match &self.active {
            Some(active) => active
                .sequence_summary()
                .into_iter()
                .map(|(seq_no, phase, prepares, commits)| SequenceStatus {
                    seq_no,
                    phase,
                    prepares,
                    commits,
                })
                .collect(),
            None => Vec::new(),
        };
        let buckets = (0..self.network.buckets())
            .map(|id| BucketStatus {
                id,
                leader: self
                    .active
                    .as_ref()
                    .map(|active| active.config().bucket_leader(id)),
            })
            .collect();
        let checkpoints = self
            .checkpoints
            .summary()
            .into_iter()
            .map(|(seq_no, max_agreements, stable)| CheckpointStatus {
                seq_no,
                max_agreements,
                stable,
            })
            .collect();
        let clients = self
            .clients
            .iter()
            .map(|(client_id, window)| {
                let (low_req_no, high_req_no) = window.watermarks();
                ClientWindowStatus {
                    client_id: client_id.clone(),
                    low_req_no,
                    high_req_no,
                    allocated: window.allocated_count(),
                }
            })
            .collect();
        let nodes = self
            .network
            .nodes()
            .iter()
            .map(|&id| NodeStatus {
                id,
                queued: self
                    .queues
                    .get(u64::from(id))
                    .map(|q| q.len())
                    .unwrap_or(0),
                oddities: self.oddities.counts(id),
            })
            .collect();
        let epoch_changer = EpochChangerStatus {
            last_active: self.epoch_changer.last_active(),
            targets: self
                .epoch_changer
                .summary()
                .into_iter()
                .map(|(number, state, suspicions, changes)| EpochTargetStatus {
                    number,
                    state,
                    suspicions,
                    changes,
                })
                .collect(),
        };

        Status {
            node_id: self.config.id,
            epoch: self.active.as_ref().map(|active| active.number()),
            low_watermark,
            high_watermark,
            sequences,
            buckets,
            checkpoints,
            clients,
            nodes,
            epoch_changer,
        }
    }

    /// A handle resolved when `client`'s window next advances.
    pub fn client_waiter(&mut self, client: &ClientId) -> oneshot::Receiver<(ReqNo, ReqNo)> {
        self.clients.window_mut(client).waiter()
    }

    /// The in-memory mirror of the durable log, as truncated by
    /// stable checkpoints. Epoch change evidence is built from this.
    pub fn persisted_entries(&self) -> &[Entry] {
        self.persisted.entries()
    }

    fn high_watermark(&self) -> SeqNo {
        match &self.active {
            Some(active) => active.high_watermark(&self.network),
            None => SeqNo::from(
                u64::from(self.checkpoints.last_stable())
                    + CHECKPOINT_WINDOWS * self.network.checkpoint_interval(),
            ),
        }
    }

    /// Re-examines every sender's queue until a full pass admits
    /// nothing: the fixed point under the current watermark and phase
    /// constraints. Per-sender FIFO is preserved throughout.
    fn drain(&mut self) -> Result<Actions> {
        let mut actions = Actions::new();
        loop {
            let mut progress = false;
            for index in 0..self.network.nodes().len() {
                let source = self.network.nodes()[index];
                let high_watermark = self.high_watermark();
                let msg = {
                    let gate = AdmissionGate {
                        epoch: self.active.as_ref(),
                        clients: &self.clients,
                        last_stable: self.checkpoints.last_stable(),
                        high_watermark,
                        checkpoint_interval: self.network.checkpoint_interval(),
                    };
                    match self.queues.get_mut(u64::from(source)) {
                        Some(queue) => queue.next(&gate),
                        None => None,
                    }
                };
                if let Some(msg) = msg {
                    progress = true;
                    let more = self.apply(source, msg)?;
                    actions.append(more);
                }
            }
            if !progress {
                break;
            }
        }
        Ok(actions)
    }

    fn apply(&mut self, source: NodeId, msg: SystemMessage) -> Result<Actions> {
        match msg {
            SystemMessage::Consensus(consensus) => {
                let seq_no = consensus.sequence_number();
                let active = match self.active.as_mut() {
                    Some(active) => active,
                    // admission holds consensus back between epochs
                    None => return Ok(Actions::new()),
                };
                Ok(match consensus.into_kind() {
                    ConsensusMessageKind::Preprepare(acks) => active.apply_preprepare(
                        source,
                        seq_no,
                        acks,
                        &self.network,
                        &mut self.oddities,
                    ),
                    ConsensusMessageKind::Prepare(digest) => active.apply_prepare(
                        source,
                        seq_no,
                        digest,
                        &self.network,
                        &mut self.oddities,
                    ),
                    ConsensusMessageKind::Commit(digest) => active.apply_commit(
                        source,
                        seq_no,
                        digest,
                        &self.network,
                        &mut self.oddities,
                    ),
                })
            }
            SystemMessage::Checkpoint(cp) => Ok(self.apply_checkpoint_msg(source, cp)),
            SystemMessage::RequestAck(ack) => Ok(self.apply_request_ack(source, ack)),
            SystemMessage::ForwardRequest { request, digest } => {
                Ok(self.apply_forward_request(source, request, digest))
            }
            SystemMessage::FetchBatch { seq_no, digest } => {
                Ok(self.batches.reply_fetch_batch(source, seq_no, digest))
            }
            SystemMessage::ForwardBatch {
                seq_no,
                digest,
                request_acks,
            } => Ok(self
                .batches
                .apply_forward_batch(source, seq_no, digest, request_acks)),
            SystemMessage::Suspect { epoch } => Ok(self.apply_suspect(source, epoch)),
            SystemMessage::EpochChange(change) => Ok(self.epoch_changer.apply_epoch_change_msg(
                source,
                change,
                &self.network,
                &mut self.oddities,
            )),
            SystemMessage::EpochChangeAck {
                new_epoch,
                originator,
                digest,
            } => Ok(self.epoch_changer.apply_epoch_change_ack(
                source,
                new_epoch,
                originator,
                digest,
                &self.network,
            )),
            SystemMessage::NewEpoch(new_epoch) => {
                let mut actions = self.epoch_changer.apply_new_epoch_msg(
                    source,
                    new_epoch,
                    &self.network,
                    &mut self.batches,
                    &mut self.oddities,
                );
                actions.append(self.maybe_install_epoch());
                Ok(actions)
            }
            SystemMessage::NewEpochEcho(config) => {
                let mut actions =
                    self.epoch_changer
                        .apply_new_epoch_echo(source, config, &self.network);
                actions.append(self.maybe_install_epoch());
                Ok(actions)
            }
            SystemMessage::NewEpochReady(config) => {
                let mut actions =
                    self.epoch_changer
                        .apply_new_epoch_ready(source, config, &self.network);
                actions.append(self.maybe_install_epoch());
                Ok(actions)
            }
        }
    }

    fn apply_checkpoint_msg(&mut self, source: NodeId, cp: Checkpoint) -> Actions {
        let mut actions = Actions::new();
        if !cp.seq_no.on_checkpoint(self.network.checkpoint_interval()) {
            self.oddities.invalid_message(source, "checkpoint");
            return actions;
        }
        let newly_stable = self.checkpoints.apply_checkpoint_msg(
            source,
            cp.seq_no,
            cp.value,
            self.network.quorum(),
        );
        if newly_stable {
            actions.append(self.stabilize(cp.seq_no));
        }
        actions
    }

    /// The truncation cascade run when a checkpoint stabilizes:
    /// client windows slide, batches and the persisted log shed
    /// concluded state, and the active window moves up.
    fn stabilize(&mut self, stable: SeqNo) -> Actions {
        debug!(seq_no = u64::from(stable), "checkpoint stable");
        let mut actions = Actions::new();
        for (_, window) in self.clients.iter_mut() {
            window.garbage_collect(stable);
        }
        let interval = self.network.checkpoint_interval();
        if u64::from(stable) > interval {
            // retain one interval of batches as epoch change evidence
            self.batches
                .truncate(SeqNo::from(u64::from(stable) - interval));
        }
        self.persisted.truncate(stable);
        self.checkpoints.truncate(stable);
        if let Some(active) = self.active.as_mut() {
            actions.append(active.move_watermarks(stable, &self.network, &self.clients));
        }
        actions
    }

    fn apply_request_ack(&mut self, source: NodeId, ack: RequestAck) -> Actions {
        let mut actions = Actions::new();
        let window = self.clients.window_mut(&ack.client_id);
        window.ack(source, ack.req_no, ack.digest);
        let agreements = window.agreements(ack.req_no, &ack.digest);
        debug!(req_no = ack.req_no, agreements, "request ack recorded");
        if let Some(active) = self.active.as_mut() {
            active.step_client_window(&ack.client_id, &self.clients);
            actions.append(active.drain_proposer(&self.network, &self.clients, false));
        }
        actions
    }

    fn apply_forward_request(
        &mut self,
        source: NodeId,
        request: Request,
        digest: Digest,
    ) -> Actions {
        let mut actions = Actions::new();
        if source == self.config.id {
            // we pre-processed our own copy when it was proposed
            return actions;
        }
        let window = self.clients.window_mut(&request.client_id);
        let (low, high) = window.watermarks();
        if request.req_no < low || request.req_no > high {
            debug!(req_no = request.req_no, "forwarded request outside window");
            return actions;
        }
        if window.has_request(request.req_no, &digest) {
            // payload already held; the forward is one more vouch
            window.ack(source, request.req_no, digest);
            return actions;
        }
        actions.request_hash(
            request_chunks(&request),
            HashPurpose::VerifyRequest {
                source,
                request,
                expected: digest,
            },
        );
        actions
    }

    fn apply_digested_request(&mut self, digest: Digest, request: Request) -> Actions {
        let mut actions = Actions::new();
        let client = request.client_id.clone();
        self.clients.window_mut(&client).allocate(request, digest);
        if let Some(active) = self.active.as_mut() {
            active.step_client_window(&client, &self.clients);
            actions.append(active.drain_proposer(&self.network, &self.clients, false));
        }
        actions
    }

    fn apply_suspect(&mut self, source: NodeId, epoch: Epoch) -> Actions {
        let mut actions = Actions::new();
        let change =
            self.epoch_changer
                .apply_suspect_msg(source, epoch, &self.network, &self.persisted);
        if let Some(change) = change {
            // stop ordering; consensus queues hold until the next
            // epoch is installed
            self.active = None;
            actions.send_all(SystemMessage::EpochChange(change));
        }
        actions
    }

    /// Installs the pending epoch once its target is ready, replacing
    /// the active epoch and seeding the new proposer.
    fn maybe_install_epoch(&mut self) -> Actions {
        let mut actions = Actions::new();
        let config = match self.epoch_changer.take_ready() {
            Some(config) => config,
            None => return actions,
        };

        let entry = Entry::NewEpoch(config.clone());
        self.persisted.add(entry.clone());
        actions.record(entry);

        // adopt the agreed checkpoint if this replica trails it
        if config.starting_checkpoint.seq_no > self.checkpoints.last_stable() {
            actions.append(self.stabilize(config.starting_checkpoint.seq_no));
        }

        let (active, install) = ActiveEpoch::from_new_epoch(
            &config,
            &self.network,
            &self.config,
            &self.batches,
            self.delivered,
        );
        self.active = Some(active);
        actions.append(install);

        if let Some(active) = self.active.as_mut() {
            for (client, _) in self.clients.iter() {
                active.step_client_window(client, &self.clients);
            }
            actions.append(active.drain_proposer(&self.network, &self.clients, false));
        }
        actions
    }

    /// Bookkeeping on the way out: ordered requests are recorded in
    /// their client windows, so later checkpoints can slide them.
    fn finish(&mut self, actions: Actions) -> Actions {
        for entry in &actions.commit {
            if entry.seq_no > self.delivered {
                self.delivered = entry.seq_no;
            }
            for ack in &entry.batch {
                self.clients
                    .window_mut(&ack.client_id)
                    .mark_committed(ack.req_no, entry.seq_no);
            }
        }
        actions
    }
}

/// A read-only snapshot of one replica.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Status {
    pub node_id: NodeId,
    pub epoch: Option<Epoch>,
    pub low_watermark: SeqNo,
    pub high_watermark: SeqNo,
    pub sequences: Vec<SequenceStatus>,
    pub buckets: Vec<BucketStatus>,
    pub checkpoints: Vec<CheckpointStatus>,
    pub clients: Vec<ClientWindowStatus>,
    pub nodes: Vec<NodeStatus>,
    pub epoch_changer: EpochChangerStatus,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct SequenceStatus {
    pub seq_no: SeqNo,
    pub phase: SeqPhase,
    pub prepares: usize,
    pub commits: usize,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct BucketStatus {
    pub id: u64,
    pub leader: Option<NodeId>,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct CheckpointStatus {
    pub seq_no: SeqNo,
    pub max_agreements: usize,
    pub stable: bool,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct ClientWindowStatus {
    pub client_id: ClientId,
    pub low_req_no: ReqNo,
    pub high_req_no: ReqNo,
    pub allocated: usize,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub id: NodeId,
    pub queued: usize,
    pub oddities: OddityCounts,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct EpochChangerStatus {
    pub last_active: Epoch,
    pub targets: Vec<EpochTargetStatus>,
}

#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct EpochTargetStatus {
    pub number: Epoch,
    pub state: TargetState,
    pub suspicions: usize,
    pub changes: usize,
}
