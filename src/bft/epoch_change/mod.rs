//! The epoch change sub-protocol.
//!
//! A weak quorum of suspicions starts it: every replica assembles an
//! epoch change message from its persisted log and stops ordering.
//! Changes are identified by externally computed digests and
//! acknowledged by everyone; once a quorum of acknowledged changes
//! exists, the new epoch's primary elects a configuration, and the
//! group locks it in with echo and ready rounds before anyone starts
//! ordering under it. Timeouts escalate to the next epoch number.

use tracing::{debug, warn};

use std::collections::BTreeMap;

use crate::bft::actions::{Actions, HashPurpose};
use crate::bft::batches::BatchTracker;
use crate::bft::collections::{self, HashMap, HashSet};
use crate::bft::core::NetworkConfig;
use crate::bft::crypto::hash::Digest;
use crate::bft::epoch::CHECKPOINT_WINDOWS;
use crate::bft::message::{
    Checkpoint,
    EpochChange,
    NewEpoch,
    NewEpochConfig,
    NodeId,
    SystemMessage,
};
use crate::bft::oddities::Oddities;
use crate::bft::ordering::{Epoch, SeqNo};
use crate::bft::persisted::PersistedLog;

/// Where a candidate epoch stands.
#[cfg_attr(
    feature = "serialize_serde",
    derive(serde::Serialize, serde::Deserialize)
)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum TargetState {
    /// Collecting suspicions and epoch changes.
    Pending,
    /// A quorum of changes is in; digests and acks are being
    /// gathered.
    Verifying,
    /// A new epoch was elected; fetching the batches it re-proposes.
    Fetching,
    /// Everything at hand; echoed the configuration.
    Echoing,
    /// Echo quorum observed; announced readiness.
    Readying,
    /// Ready quorum observed; the configuration can be installed.
    Ready,
    /// Concluded; either installed or superseded.
    Idle,
}

struct RemoteChange {
    msg: EpochChange,
    digest: Option<Digest>,
}

/// Book-keeping for one candidate epoch number.
struct EpochTarget {
    number: Epoch,
    state: TargetState,
    suspicions: HashSet<NodeId>,
    changes: HashMap<NodeId, RemoteChange>,
    acks: HashMap<(NodeId, Digest), HashSet<NodeId>>,
    echoes: Vec<(NewEpochConfig, HashSet<NodeId>)>,
    readies: Vec<(NewEpochConfig, HashSet<NodeId>)>,
    my_epoch_change: Option<EpochChange>,
    network_new_epoch: Option<NewEpochConfig>,
    sent_new_epoch: bool,
    ticks: u32,
}

impl EpochTarget {
    fn new(number: Epoch) -> Self {
        Self {
            number,
            state: TargetState::Pending,
            suspicions: collections::hash_set(),
            changes: collections::hash_map(),
            acks: collections::hash_map(),
            echoes: Vec::new(),
            readies: Vec::new(),
            my_epoch_change: None,
            network_new_epoch: None,
            sent_new_epoch: false,
            ticks: 0,
        }
    }

    fn tally(
        votes: &mut Vec<(NewEpochConfig, HashSet<NodeId>)>,
        config: &NewEpochConfig,
        source: NodeId,
    ) -> usize {
        for (candidate, voters) in votes.iter_mut() {
            if candidate == config {
                voters.insert(source);
                return voters.len();
            }
        }
        let mut voters = collections::hash_set();
        voters.insert(source);
        votes.push((config.clone(), voters));
        1
    }

    /// The verified changes a quorum of replicas acknowledged,
    /// ascending by originator, which is the deterministic input the
    /// primary elects a configuration from.
    fn strong_changes(&self, quorum: usize) -> Vec<(NodeId, &EpochChange)> {
        let mut strong: Vec<(NodeId, &EpochChange)> = self
            .changes
            .iter()
            .filter_map(|(originator, rc)| {
                let digest = rc.digest?;
                let acked = self
                    .acks
                    .get(&(*originator, digest))
                    .map(|set| set.len())
                    .unwrap_or(0);
                (acked >= quorum).then(|| (*originator, &rc.msg))
            })
            .collect();
        strong.sort_by_key(|(originator, _)| *originator);
        strong
    }
}

/// Drives epoch targets from suspicion to installation.
pub struct EpochChanger {
    my_id: NodeId,
    last_active: Epoch,
    /// The highest target this replica is pursuing.
    pending: Epoch,
    targets: BTreeMap<Epoch, EpochTarget>,
}

impl EpochChanger {
    pub fn new(my_id: NodeId, initial_epoch: Epoch) -> Self {
        Self {
            my_id,
            last_active: initial_epoch,
            pending: initial_epoch,
            targets: BTreeMap::new(),
        }
    }

    /// The number of the last installed epoch.
    pub fn last_active(&self) -> Epoch {
        self.last_active
    }

    fn target(&mut self, number: Epoch) -> &mut EpochTarget {
        self.targets
            .entry(number)
            .or_insert_with(|| EpochTarget::new(number))
    }

    fn within_skip(&self, number: Epoch, network: &NetworkConfig) -> bool {
        u64::from(number) <= u64::from(self.last_active) + network.max_epoch_skip()
    }

    /// Tallies a suspicion of `epoch`. At a weak quorum, this replica
    /// assembles its own epoch change for `epoch + 1` from the
    /// persisted log and returns it; the façade then drops the active
    /// epoch and broadcasts the change.
    pub fn apply_suspect_msg(
        &mut self,
        source: NodeId,
        epoch: Epoch,
        network: &NetworkConfig,
        persisted: &PersistedLog,
    ) -> Option<EpochChange> {
        if epoch < self.last_active {
            debug!(epoch = u64::from(epoch), "suspicion of concluded epoch");
            return None;
        }
        let number = epoch.next();
        if !self.within_skip(number, network) {
            warn!(epoch = u64::from(epoch), "suspicion beyond the epoch skip bound");
            return None;
        }
        let weak_quorum = network.weak_quorum();
        let target = self.target(number);
        target.suspicions.insert(source);
        if target.suspicions.len() < weak_quorum || target.my_epoch_change.is_some() {
            return None;
        }
        let change = persisted.construct_epoch_change(number);
        target.my_epoch_change = Some(change.clone());
        if number > self.pending {
            self.pending = number;
        }
        warn!(
            new_epoch = u64::from(number),
            "weak quorum of suspicions, changing epoch"
        );
        Some(change)
    }

    /// Stores a peer's epoch change and asks the host to digest it.
    pub fn apply_epoch_change_msg(
        &mut self,
        source: NodeId,
        msg: EpochChange,
        network: &NetworkConfig,
        oddities: &mut Oddities,
    ) -> Actions {
        let mut actions = Actions::new();
        let number = msg.new_epoch;
        if number <= self.last_active {
            debug!(epoch = u64::from(number), "epoch change for concluded epoch");
            return actions;
        }
        if !self.within_skip(number, network) {
            oddities.invalid_message(source, "epochchange");
            return actions;
        }
        let quorum = network.quorum();
        let target = self.target(number);
        if target.changes.contains_key(&source) {
            oddities.already_processed(source, "epochchange");
            return actions;
        }
        actions.request_hash(
            msg.hash_chunks(),
            HashPurpose::EpochChange {
                originator: source,
                new_epoch: number,
            },
        );
        target.changes.insert(
            source,
            RemoteChange {
                msg,
                digest: None,
            },
        );
        if target.state == TargetState::Pending && target.changes.len() >= quorum {
            target.state = TargetState::Verifying;
        }
        actions
    }

    /// The host digested a peer's epoch change; acknowledge it to the
    /// group.
    pub fn apply_epoch_change_digest(
        &mut self,
        originator: NodeId,
        new_epoch: Epoch,
        digest: Digest,
    ) -> Actions {
        let mut actions = Actions::new();
        if new_epoch <= self.last_active {
            return actions;
        }
        let target = self.target(new_epoch);
        match target.changes.get_mut(&originator) {
            Some(rc) => rc.digest = Some(digest),
            None => {
                debug!(
                    originator = u64::from(originator),
                    "digest for unknown epoch change"
                );
                return actions;
            }
        }
        actions.send_all(SystemMessage::EpochChangeAck {
            new_epoch,
            originator,
            digest,
        });
        actions
    }

    /// Tallies an acknowledgement of `(originator, digest)`.
    pub fn apply_epoch_change_ack(
        &mut self,
        source: NodeId,
        new_epoch: Epoch,
        originator: NodeId,
        digest: Digest,
        network: &NetworkConfig,
    ) -> Actions {
        if new_epoch <= self.last_active {
            return Actions::new();
        }
        let target = self.target(new_epoch);
        target
            .acks
            .entry((originator, digest))
            .or_insert_with(collections::hash_set)
            .insert(source);
        self.maybe_elect(network)
    }

    /// If this replica is the pending target's primary and a quorum
    /// of acknowledged changes is in, elect the new configuration and
    /// announce it.
    fn maybe_elect(&mut self, network: &NetworkConfig) -> Actions {
        let mut actions = Actions::new();
        let quorum = network.quorum();
        let primary = network.primary(self.pending);
        let my_id = self.my_id;
        let pending = self.pending;
        let target = match self.targets.get_mut(&pending) {
            Some(target) => target,
            None => return actions,
        };
        if primary != my_id
            || target.sent_new_epoch
            || target.state > TargetState::Verifying
        {
            return actions;
        }
        let strong = target.strong_changes(quorum);
        if strong.len() < quorum {
            return actions;
        }
        let config = Self::elect_config(pending, &strong, network);
        let epoch_changes = strong
            .into_iter()
            .map(|(originator, change)| (originator, change.clone()))
            .collect();
        target.sent_new_epoch = true;
        actions.send_all(SystemMessage::NewEpoch(NewEpoch {
            config,
            epoch_changes,
        }));
        actions
    }

    /// Deterministically derives the new epoch's configuration from a
    /// set of epoch changes: anchor at the highest checkpoint a weak
    /// quorum carries, re-propose every slot with prepare evidence,
    /// null-propose the gaps in between.
    fn elect_config(
        number: Epoch,
        changes: &[(NodeId, &EpochChange)],
        network: &NetworkConfig,
    ) -> NewEpochConfig {
        // checkpoint availability needs a weak quorum, so at least
        // one honest replica can serve the state behind it
        let mut counts: Vec<(&Checkpoint, usize)> = Vec::new();
        for (_, change) in changes {
            for cp in &change.checkpoints {
                match counts.iter_mut().find(|(known, _)| *known == cp) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((cp, 1)),
                }
            }
        }
        let starting_checkpoint = counts
            .into_iter()
            .filter(|(_, count)| *count >= network.weak_quorum())
            .map(|(cp, _)| cp)
            .max_by(|a, b| (a.seq_no, &a.value).cmp(&(b.seq_no, &b.value)))
            .cloned()
            .unwrap_or(Checkpoint {
                seq_no: SeqNo::from(0),
                value: Vec::new(),
            });

        let base = u64::from(starting_checkpoint.seq_no);
        let width = CHECKPOINT_WINDOWS * network.checkpoint_interval();
        let mut final_preprepares: Vec<Option<Digest>> = Vec::new();
        for offset in 0..width {
            let seq_no = SeqNo::from(base + 1 + offset);
            let digest = changes
                .iter()
                .flat_map(|(_, change)| change.p_set.iter())
                .filter(|p| p.seq_no == seq_no)
                .max_by_key(|p| (p.epoch, p.digest))
                .map(|p| p.digest);
            final_preprepares.push(digest);
        }
        // fresh slots past the last prepared one stay proposable
        while final_preprepares.last() == Some(&None) {
            final_preprepares.pop();
        }

        NewEpochConfig {
            number,
            starting_checkpoint,
            final_preprepares,
        }
    }

    /// A `NewEpoch` arrived: validate its election against the
    /// evidence it carries, then start fetching whatever it
    /// re-proposes that this replica is missing.
    pub fn apply_new_epoch_msg(
        &mut self,
        source: NodeId,
        msg: NewEpoch,
        network: &NetworkConfig,
        batches: &mut BatchTracker,
        oddities: &mut Oddities,
    ) -> Actions {
        let number = msg.config.number;
        if number <= self.last_active {
            debug!(epoch = u64::from(number), "new epoch for concluded epoch");
            return Actions::new();
        }
        if source != network.primary(number) || !self.within_skip(number, network) {
            oddities.invalid_message(source, "newepoch");
            return Actions::new();
        }
        if msg.epoch_changes.len() < network.quorum() {
            oddities.invalid_message(source, "newepoch");
            return Actions::new();
        }
        let evidence: Vec<(NodeId, &EpochChange)> = msg
            .epoch_changes
            .iter()
            .map(|(originator, change)| (*originator, change))
            .collect();
        let expected = Self::elect_config(number, &evidence, network);
        if expected != msg.config {
            oddities.invalid_message(source, "newepoch");
            return Actions::new();
        }

        if number > self.pending {
            self.pending = number;
        }
        let target = self.target(number);
        target.network_new_epoch = Some(msg.config);
        target.state = TargetState::Fetching;
        self.fetch_new_epoch_state(network, batches)
    }

    /// Fetches the batches the pending configuration re-proposes;
    /// echoes the configuration once nothing is missing.
    pub fn fetch_new_epoch_state(
        &mut self,
        network: &NetworkConfig,
        batches: &mut BatchTracker,
    ) -> Actions {
        let mut actions = Actions::new();
        let pending = self.pending;
        let config = {
            let target = match self.targets.get_mut(&pending) {
                Some(target) => target,
                None => return actions,
            };
            if target.state != TargetState::Fetching {
                return actions;
            }
            match &target.network_new_epoch {
                Some(config) => config.clone(),
                None => return actions,
            }
        };

        let base = u64::from(config.starting_checkpoint.seq_no);
        let mut missing = false;
        for (offset, slot) in config.final_preprepares.iter().enumerate() {
            if let Some(digest) = slot {
                if !batches.has_batch(digest) {
                    missing = true;
                    let seq_no = SeqNo::from(base + 1 + offset as u64);
                    actions.append(batches.fetch_batch(seq_no, *digest));
                }
            }
        }
        if missing || batches.has_fetch_in_flight() {
            return actions;
        }

        let target = self.target(pending);
        target.state = TargetState::Echoing;
        actions.send_all(SystemMessage::NewEpochEcho(config));
        actions.append(self.advance(network));
        actions
    }

    /// Tallies an echo of a new epoch configuration.
    pub fn apply_new_epoch_echo(
        &mut self,
        source: NodeId,
        config: NewEpochConfig,
        network: &NetworkConfig,
    ) -> Actions {
        if config.number <= self.last_active {
            return Actions::new();
        }
        let target = self.target(config.number);
        EpochTarget::tally(&mut target.echoes, &config, source);
        self.advance(network)
    }

    /// Tallies a readiness announcement.
    pub fn apply_new_epoch_ready(
        &mut self,
        source: NodeId,
        config: NewEpochConfig,
        network: &NetworkConfig,
    ) -> Actions {
        if config.number <= self.last_active {
            return Actions::new();
        }
        let target = self.target(config.number);
        EpochTarget::tally(&mut target.readies, &config, source);
        self.advance(network)
    }

    /// Moves the pending target through the echo and ready quorums.
    fn advance(&mut self, network: &NetworkConfig) -> Actions {
        let mut actions = Actions::new();
        let quorum = network.quorum();
        let pending = self.pending;
        let target = match self.targets.get_mut(&pending) {
            Some(target) => target,
            None => return actions,
        };
        let config = match &target.network_new_epoch {
            Some(config) => config.clone(),
            None => return actions,
        };

        if target.state == TargetState::Echoing {
            let echoed = target
                .echoes
                .iter()
                .find(|(candidate, _)| *candidate == config)
                .map(|(_, voters)| voters.len())
                .unwrap_or(0);
            if echoed >= quorum {
                target.state = TargetState::Readying;
                actions.send_all(SystemMessage::NewEpochReady(config.clone()));
            }
        }
        if target.state == TargetState::Readying {
            let ready = target
                .readies
                .iter()
                .find(|(candidate, _)| *candidate == config)
                .map(|(_, voters)| voters.len())
                .unwrap_or(0);
            if ready >= quorum {
                target.state = TargetState::Ready;
            }
        }
        actions
    }

    /// Concludes the pending target if it is ready to install,
    /// handing back the configuration the new active epoch is built
    /// from.
    pub fn take_ready(&mut self) -> Option<NewEpochConfig> {
        let pending = self.pending;
        let target = self.targets.get_mut(&pending)?;
        if target.state != TargetState::Ready {
            return None;
        }
        target.state = TargetState::Idle;
        self.last_active = target.number;
        let config = target.network_new_epoch.clone();
        // older targets are superseded
        self.targets.retain(|number, _| *number >= pending);
        config
    }

    /// Advances the epoch change timeout. A pending target that
    /// cannot conclude escalates to the next epoch number.
    pub fn tick(
        &mut self,
        network: &NetworkConfig,
        persisted: &PersistedLog,
        timeout_ticks: u32,
    ) -> Actions {
        let mut actions = Actions::new();
        if self.pending <= self.last_active {
            return actions;
        }
        let pending = self.pending;
        let expired = {
            let target = match self.targets.get_mut(&pending) {
                Some(target) => target,
                None => return actions,
            };
            if target.state == TargetState::Idle {
                return actions;
            }
            target.ticks += 1;
            target.ticks >= timeout_ticks
        };
        if !expired {
            return actions;
        }

        let number = pending.next();
        if !self.within_skip(number, network) {
            warn!(
                epoch = u64::from(pending),
                "epoch change timed out at the skip bound"
            );
            return actions;
        }
        warn!(
            epoch = u64::from(pending),
            new_epoch = u64::from(number),
            "epoch change timed out, escalating"
        );
        let change = persisted.construct_epoch_change(number);
        let target = self.target(number);
        target.my_epoch_change = Some(change.clone());
        self.pending = number;
        actions.send_all(SystemMessage::EpochChange(change));
        actions
    }

    /// Whether the pending target is waiting on fetched state.
    pub fn is_fetching(&self) -> bool {
        self.targets
            .get(&self.pending)
            .map(|t| t.state == TargetState::Fetching)
            .unwrap_or(false)
    }

    /// (number, state, suspicions, changes) per live target.
    pub fn summary(&self) -> Vec<(Epoch, TargetState, usize, usize)> {
        self.targets
            .values()
            .map(|t| (t.number, t.state, t.suspicions.len(), t.changes.len()))
            .collect()
    }
}
