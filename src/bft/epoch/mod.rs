//! The active epoch: three-phase commit over bucketed sequence
//! numbers, between two checkpoint horizons.
//!
//! Each slot walks `Uninitialized → Allocated → Preprepared →
//! Prepared → Committed`, never backwards. Prepared needs `2f`
//! matching prepares on top of the local pre-prepare; Committed needs
//! a full `2f + 1` commit quorum. Batches are handed to the
//! application strictly in slot order, so checkpoint values are
//! always a function of the committed prefix.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bft::actions::{Actions, CommitEntry, HashPurpose};
use crate::bft::batches::BatchTracker;
use crate::bft::clients::ClientWindows;
use crate::bft::collections::{self, HashSet};
use crate::bft::core::{NetworkConfig, ReplicaConfig};
use crate::bft::crypto::hash::Digest;
use crate::bft::message::{
    batch_chunks,
    ClientId,
    ConsensusMessage,
    ConsensusMessageKind,
    NewEpochConfig,
    NodeId,
    PEntry,
    QEntry,
    RequestAck,
    SystemMessage,
};
use crate::bft::oddities::Oddities;
use crate::bft::ordering::{Epoch, SeqNo};
use crate::bft::persisted::Entry;
use crate::bft::proposer::Proposer;

/// How many checkpoint intervals fit between the low and high
/// sequence watermarks of an active epoch.
pub const CHECKPOINT_WINDOWS: u64 = 3;

/// The per-slot protocol phase. Transitions only move forward.
#[cfg_attr(
    feature = "serialize_serde",
    derive(serde::Serialize, serde::Deserialize)
)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum SeqPhase {
    Uninitialized,
    Allocated,
    Preprepared,
    Prepared,
    Committed,
}

struct Sequence {
    phase: SeqPhase,
    digest: Option<Digest>,
    batch: Option<Vec<RequestAck>>,
    prepares: HashSet<NodeId>,
    commits: HashSet<NodeId>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            phase: SeqPhase::Uninitialized,
            digest: None,
            batch: None,
            prepares: collections::hash_set(),
            commits: collections::hash_set(),
        }
    }
}

/// The leader to bucket assignment in effect for one epoch.
#[derive(Clone, Debug)]
pub struct EpochConfig {
    pub number: Epoch,
    /// Bucket `b` is led by `leaders[b % leaders.len()]`.
    pub leaders: Vec<NodeId>,
}

impl EpochConfig {
    pub fn bucket_leader(&self, bucket: u64) -> NodeId {
        self.leaders[(bucket % self.leaders.len() as u64) as usize]
    }
}

/// The replica's view of the epoch currently ordering batches.
pub struct ActiveEpoch {
    config: EpochConfig,
    my_id: NodeId,
    /// The stable checkpoint this window is anchored at.
    low: SeqNo,
    seqs: BTreeMap<SeqNo, Sequence>,
    proposer: Proposer,
    /// The next slot to hand to the application.
    next_delivery: SeqNo,
    ticks_since_progress: u32,
    suspected: bool,
}

impl ActiveEpoch {
    /// Starts a fresh epoch anchored at the stable checkpoint `low`.
    pub fn new(
        config: EpochConfig,
        network: &NetworkConfig,
        replica: &ReplicaConfig,
        low: SeqNo,
    ) -> Self {
        let proposer = Self::proposer_for(&config, network, replica, low);
        Self {
            config,
            my_id: replica.id,
            low,
            seqs: BTreeMap::new(),
            proposer,
            next_delivery: low.next(),
            ticks_since_progress: 0,
            suspected: false,
        }
    }

    /// Rebuilds an epoch from an agreed new-epoch configuration:
    /// re-proposed slots restart at `Preprepared` with their known
    /// batch, null slots commit empty batches outright. Slots at or
    /// below `delivered` re-commit for safety but are not handed to
    /// the application a second time.
    pub fn from_new_epoch(
        new_epoch: &NewEpochConfig,
        network: &NetworkConfig,
        replica: &ReplicaConfig,
        batches: &BatchTracker,
        delivered: SeqNo,
    ) -> (Self, Actions) {
        let low = new_epoch.starting_checkpoint.seq_no;
        let config = network.epoch_config(new_epoch.number);
        let floor = SeqNo::from(u64::from(low) + new_epoch.final_preprepares.len() as u64);
        let proposer = Self::proposer_for(&config, network, replica, floor);

        let mut epoch = Self {
            config,
            my_id: replica.id,
            low,
            seqs: BTreeMap::new(),
            proposer,
            next_delivery: low.next().max(delivered.next()),
            ticks_since_progress: 0,
            suspected: false,
        };

        let mut actions = Actions::new();
        for (offset, slot) in new_epoch.final_preprepares.iter().enumerate() {
            let seq_no = SeqNo::from(u64::from(low) + 1 + offset as u64);
            match slot {
                Some(digest) => {
                    let acks = match batches.batch(digest) {
                        Some(entry) => entry.acks.clone(),
                        None => {
                            // the fetch phase should have made this
                            // impossible; leave the slot fresh
                            warn!(seq_no = u64::from(seq_no), "re-proposed batch missing");
                            continue;
                        }
                    };
                    let sequence = epoch.seqs.entry(seq_no).or_default();
                    sequence.phase = SeqPhase::Preprepared;
                    sequence.digest = Some(*digest);
                    sequence.batch = Some(acks);
                    actions.record(Entry::QEntry(QEntry {
                        epoch: epoch.config.number,
                        seq_no,
                        digest: *digest,
                    }));
                    let bucket = seq_no.bucket(network.buckets());
                    if epoch.config.bucket_leader(bucket) != epoch.my_id {
                        actions.send_all(SystemMessage::Consensus(ConsensusMessage::new(
                            epoch.config.number,
                            seq_no,
                            ConsensusMessageKind::Prepare(*digest),
                        )));
                    }
                }
                None => {
                    let sequence = epoch.seqs.entry(seq_no).or_default();
                    sequence.phase = SeqPhase::Committed;
                    sequence.batch = Some(Vec::new());
                }
            }
        }
        actions.append(epoch.try_deliver(network));
        (epoch, actions)
    }

    fn proposer_for(
        config: &EpochConfig,
        network: &NetworkConfig,
        replica: &ReplicaConfig,
        floor: SeqNo,
    ) -> Proposer {
        let owned = (0..network.buckets())
            .filter(|&bucket| config.bucket_leader(bucket) == replica.id)
            .collect();
        Proposer::new(
            replica.batch_size,
            replica.heartbeat_ticks,
            network.buckets(),
            owned,
            floor,
        )
    }

    /// The epoch number.
    pub fn number(&self) -> Epoch {
        self.config.number
    }

    /// The low sequence watermark (the anchoring stable checkpoint).
    pub fn low_watermark(&self) -> SeqNo {
        self.low
    }

    /// The high sequence watermark.
    pub fn high_watermark(&self, network: &NetworkConfig) -> SeqNo {
        SeqNo::from(u64::from(self.low) + CHECKPOINT_WINDOWS * network.checkpoint_interval())
    }

    /// Whether `seq_no` lies inside the admissible window.
    pub fn in_window(&self, seq_no: SeqNo, network: &NetworkConfig) -> bool {
        seq_no > self.low && seq_no <= self.high_watermark(network)
    }

    /// Whether the local slot already knows its batch digest, which
    /// is what prepares and commits are checked against.
    pub fn digest_known(&self, seq_no: SeqNo) -> bool {
        self.seqs
            .get(&seq_no)
            .map(|s| s.digest.is_some())
            .unwrap_or(false)
    }

    /// Applies a pre-prepare from the slot's bucket leader.
    pub fn apply_preprepare(
        &mut self,
        source: NodeId,
        seq_no: SeqNo,
        acks: Vec<RequestAck>,
        network: &NetworkConfig,
        oddities: &mut Oddities,
    ) -> Actions {
        let mut actions = Actions::new();
        let bucket = seq_no.bucket(network.buckets());
        if self.config.bucket_leader(bucket) != source {
            oddities.invalid_message(source, "preprepare");
            return actions;
        }
        let sequence = self.seqs.entry(seq_no).or_default();
        match sequence.phase {
            SeqPhase::Uninitialized => {
                sequence.phase = SeqPhase::Allocated;
                sequence.batch = Some(acks.clone());
                actions.request_hash(
                    batch_chunks(&acks),
                    HashPurpose::Batch {
                        epoch: self.config.number,
                        seq_no,
                        acks,
                    },
                );
            }
            _ => {
                if sequence.batch.as_ref() == Some(&acks) {
                    oddities.already_processed(source, "preprepare");
                } else {
                    oddities.invalid_message(source, "preprepare");
                }
            }
        }
        actions
    }

    /// The host finished digesting a pre-prepared batch; the slot
    /// becomes `Preprepared` and non-leading replicas vote.
    pub fn apply_batch_digest(
        &mut self,
        seq_no: SeqNo,
        digest: Digest,
        network: &NetworkConfig,
    ) -> Actions {
        let mut actions = Actions::new();
        if !self.in_window(seq_no, network) {
            debug!(seq_no = u64::from(seq_no), "batch digest outside window");
            return actions;
        }
        let number = self.config.number;
        let sequence = self.seqs.entry(seq_no).or_default();
        if sequence.phase != SeqPhase::Allocated {
            debug!(seq_no = u64::from(seq_no), "slot already digested");
            return actions;
        }
        sequence.phase = SeqPhase::Preprepared;
        sequence.digest = Some(digest);
        actions.record(Entry::QEntry(QEntry {
            epoch: number,
            seq_no,
            digest,
        }));
        let bucket = seq_no.bucket(network.buckets());
        if self.config.bucket_leader(bucket) != self.my_id {
            // the bucket leader's pre-prepare is its vote
            actions.send_all(SystemMessage::Consensus(ConsensusMessage::new(
                number,
                seq_no,
                ConsensusMessageKind::Prepare(digest),
            )));
        }
        actions
    }

    /// Applies a prepare vote.
    pub fn apply_prepare(
        &mut self,
        source: NodeId,
        seq_no: SeqNo,
        digest: Digest,
        network: &NetworkConfig,
        oddities: &mut Oddities,
    ) -> Actions {
        let mut actions = Actions::new();
        let number = self.config.number;
        let sequence = match self.seqs.get_mut(&seq_no) {
            Some(sequence) if sequence.digest.is_some() => sequence,
            _ => {
                debug!(seq_no = u64::from(seq_no), "prepare for undigested slot");
                return actions;
            }
        };
        if sequence.digest != Some(digest) {
            oddities.invalid_message(source, "prepare");
            return actions;
        }
        if !sequence.prepares.insert(source) {
            oddities.already_processed(source, "prepare");
            return actions;
        }
        if sequence.phase == SeqPhase::Preprepared && sequence.prepares.len() >= 2 * network.f() {
            sequence.phase = SeqPhase::Prepared;
            actions.record(Entry::PEntry(PEntry {
                epoch: number,
                seq_no,
                digest,
            }));
            actions.send_all(SystemMessage::Consensus(ConsensusMessage::new(
                number,
                seq_no,
                ConsensusMessageKind::Commit(digest),
            )));
        }
        actions
    }

    /// Applies a commit vote.
    pub fn apply_commit(
        &mut self,
        source: NodeId,
        seq_no: SeqNo,
        digest: Digest,
        network: &NetworkConfig,
        oddities: &mut Oddities,
    ) -> Actions {
        let mut actions = Actions::new();
        let sequence = match self.seqs.get_mut(&seq_no) {
            Some(sequence) if sequence.digest.is_some() => sequence,
            _ => {
                debug!(seq_no = u64::from(seq_no), "commit for undigested slot");
                return actions;
            }
        };
        if sequence.digest != Some(digest) {
            oddities.invalid_message(source, "commit");
            return actions;
        }
        if !sequence.commits.insert(source) {
            oddities.already_processed(source, "commit");
            return actions;
        }
        if sequence.phase == SeqPhase::Prepared && sequence.commits.len() >= network.quorum() {
            sequence.phase = SeqPhase::Committed;
            actions.append(self.try_deliver(network));
        }
        actions
    }

    /// Hands committed slots to the application, in order, stopping
    /// at the first slot still in flight.
    fn try_deliver(&mut self, network: &NetworkConfig) -> Actions {
        let mut actions = Actions::new();
        loop {
            let sequence = match self.seqs.get(&self.next_delivery) {
                Some(sequence) if sequence.phase == SeqPhase::Committed => sequence,
                _ => break,
            };
            let batch = sequence.batch.clone().unwrap_or_default();
            let seq_no = self.next_delivery;
            actions.commit.push(CommitEntry { seq_no, batch });
            if seq_no.on_checkpoint(network.checkpoint_interval()) {
                actions.checkpoint.push(seq_no);
            }
            self.next_delivery = seq_no.next();
            self.ticks_since_progress = 0;
            self.suspected = false;
        }
        actions
    }

    /// Slides the window up to the newly stable checkpoint, discards
    /// concluded slots, and lets the proposer fill the fresh slots.
    pub fn move_watermarks(
        &mut self,
        stable: SeqNo,
        network: &NetworkConfig,
        clients: &ClientWindows,
    ) -> Actions {
        if stable <= self.low {
            return Actions::new();
        }
        self.low = stable;
        self.seqs = self.seqs.split_off(&stable.next());
        if self.next_delivery <= stable {
            self.next_delivery = stable.next();
        }
        self.drain_proposer(network, clients, false)
    }

    /// Pulls newly ready requests of `client` into the proposer.
    pub fn step_client_window(&mut self, client: &ClientId, clients: &ClientWindows) {
        if let Some(window) = clients.window(client) {
            self.proposer.step_client_window(client, window);
        }
    }

    /// Proposes whatever the window and the ready lists admit.
    pub fn drain_proposer(
        &mut self,
        network: &NetworkConfig,
        clients: &ClientWindows,
        force: bool,
    ) -> Actions {
        let high = self.high_watermark(network);
        self.proposer
            .drain(self.config.number, high, clients, force)
    }

    /// Advances the epoch's timers: heartbeat proposals for owned
    /// buckets, and suspicion of the epoch when in-flight slots make
    /// no progress.
    pub fn tick(
        &mut self,
        network: &NetworkConfig,
        clients: &ClientWindows,
        suspect_ticks: u32,
    ) -> Actions {
        let mut actions = Actions::new();
        self.ticks_since_progress += 1;
        if self.proposer.tick() {
            actions.append(self.drain_proposer(network, clients, true));
        }
        let in_flight = self
            .seqs
            .values()
            .any(|s| s.phase > SeqPhase::Uninitialized && s.phase < SeqPhase::Committed);
        if in_flight && self.ticks_since_progress >= suspect_ticks && !self.suspected {
            self.suspected = true;
            actions.send_all(SystemMessage::Suspect {
                epoch: self.config.number,
            });
        }
        actions
    }

    /// Per-slot phase and vote counts, for status snapshots.
    pub fn sequence_summary(&self) -> Vec<(SeqNo, SeqPhase, usize, usize)> {
        self.seqs
            .iter()
            .map(|(seq_no, s)| (*seq_no, s.phase, s.prepares.len(), s.commits.len()))
            .collect()
    }

    /// The epoch's leader assignment.
    pub fn config(&self) -> &EpochConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::hash::digest_chunks;
    use crate::bft::message::{batch_chunks, ClientId};

    fn network() -> NetworkConfig {
        // n = 4, f = 1, buckets = 4, interval = 5
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

    fn epoch_for(id: u32, network: &NetworkConfig) -> ActiveEpoch {
        ActiveEpoch::new(
            network.epoch_config(Epoch::from(1)),
            network,
            &replica(id),
            SeqNo::from(0),
        )
    }

    fn batch(seq_no: u64) -> (Vec<RequestAck>, Digest) {
        let acks = vec![RequestAck {
            client_id: ClientId::new(&b"c"[..]),
            req_no: seq_no,
            digest: digest_chunks([&seq_no.to_le_bytes()[..]]),
        }];
        let digest = digest_chunks(batch_chunks(&acks).iter().map(Vec::as_slice));
        (acks, digest)
    }

    // walks one slot of `epoch` to Preprepared, from the point of
    // view of a replica that does not lead the slot's bucket
    fn preprepare(
        epoch: &mut ActiveEpoch,
        network: &NetworkConfig,
        oddities: &mut Oddities,
        seq_no: SeqNo,
    ) -> Digest {
        let leader = epoch
            .config()
            .bucket_leader(seq_no.bucket(network.buckets()));
        let (acks, digest) = batch(u64::from(seq_no));
        let actions = epoch.apply_preprepare(leader, seq_no, acks, network, oddities);
        assert_eq!(actions.hash.len(), 1);
        let actions = epoch.apply_batch_digest(seq_no, digest, network);
        assert!(actions
            .broadcast
            .iter()
            .any(|m| matches!(m, SystemMessage::Consensus(c)
                if matches!(c.kind(), ConsensusMessageKind::Prepare(_)))));
        digest
    }

    #[test]
    fn test_preprepare_from_wrong_leader_is_invalid() {
        let network = network();
        let mut oddities = Oddities::new();
        let mut epoch = epoch_for(0, &network);

        let seq_no = SeqNo::from(1);
        let leader = epoch
            .config()
            .bucket_leader(seq_no.bucket(network.buckets()));
        let not_leader = network
            .nodes()
            .iter()
            .copied()
            .find(|id| *id != leader)
            .expect("more than one node");

        let (acks, _) = batch(1);
        let actions = epoch.apply_preprepare(not_leader, seq_no, acks, &network, &mut oddities);
        assert!(actions.is_empty());
        assert_eq!(oddities.counts(not_leader).invalid, 1);
        assert!(!epoch.digest_known(seq_no));
    }

    #[test]
    fn test_three_phase_progression() {
        let network = network();
        let mut oddities = Oddities::new();
        // node 0 does not lead bucket 1 in epoch 1
        let mut epoch = epoch_for(0, &network);
        let seq_no = SeqNo::from(1);
        let digest = preprepare(&mut epoch, &network, &mut oddities, seq_no);

        // 2f = 2 matching prepares move the slot to Prepared
        let a1 = epoch.apply_prepare(NodeId::from(0), seq_no, digest, &network, &mut oddities);
        assert!(a1.broadcast.is_empty());
        let a2 = epoch.apply_prepare(NodeId::from(3), seq_no, digest, &network, &mut oddities);
        assert!(a2.broadcast.iter().any(|m| matches!(
            m,
            SystemMessage::Consensus(c) if matches!(c.kind(), ConsensusMessageKind::Commit(_))
        )));

        // 2f + 1 = 3 commits deliver the batch
        for id in 0..2u32 {
            let actions =
                epoch.apply_commit(NodeId::from(id), seq_no, digest, &network, &mut oddities);
            assert!(actions.commit.is_empty());
        }
        let actions = epoch.apply_commit(NodeId::from(2), seq_no, digest, &network, &mut oddities);
        assert_eq!(actions.commit.len(), 1);
        assert_eq!(actions.commit[0].seq_no, seq_no);
    }

    #[test]
    fn test_duplicate_prepare_is_idempotent() {
        let network = network();
        let mut oddities = Oddities::new();
        let mut epoch = epoch_for(0, &network);
        let seq_no = SeqNo::from(1);
        let digest = preprepare(&mut epoch, &network, &mut oddities, seq_no);

        let first = epoch.apply_prepare(NodeId::from(3), seq_no, digest, &network, &mut oddities);
        let summary_before = epoch.sequence_summary();
        let second = epoch.apply_prepare(NodeId::from(3), seq_no, digest, &network, &mut oddities);

        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(epoch.sequence_summary(), summary_before);
        assert_eq!(oddities.counts(NodeId::from(3)).already_processed, 1);
    }

    #[test]
    fn test_conflicting_digest_does_not_flip_state() {
        let network = network();
        let mut oddities = Oddities::new();
        let mut epoch = epoch_for(0, &network);
        let seq_no = SeqNo::from(1);
        let _digest = preprepare(&mut epoch, &network, &mut oddities, seq_no);

        let (_, conflicting) = batch(99);
        let actions =
            epoch.apply_prepare(NodeId::from(3), seq_no, conflicting, &network, &mut oddities);
        assert!(actions.is_empty());
        assert_eq!(oddities.counts(NodeId::from(3)).invalid, 1);

        let summary = epoch.sequence_summary();
        let slot = summary.iter().find(|(s, ..)| *s == seq_no).expect("slot");
        assert_eq!(slot.1, SeqPhase::Preprepared);
        assert_eq!(slot.2, 0);
    }

    #[test]
    fn test_in_order_delivery_holds_back_later_commits() {
        let network = network();
        let mut oddities = Oddities::new();
        let mut epoch = epoch_for(0, &network);

        let first = SeqNo::from(1);
        let second = SeqNo::from(2);
        let d1 = preprepare(&mut epoch, &network, &mut oddities, first);
        let d2 = preprepare(&mut epoch, &network, &mut oddities, second);

        let commit = |epoch: &mut ActiveEpoch, oddities: &mut Oddities, seq, digest| {
            let mut actions = Actions::new();
            for id in 0..3u32 {
                actions.append(epoch.apply_commit(NodeId::from(id), seq, digest, &network, oddities));
            }
            actions
        };

        // prepare both slots
        for (seq, digest) in [(first, d1), (second, d2)] {
            epoch.apply_prepare(NodeId::from(0), seq, digest, &network, &mut oddities);
            epoch.apply_prepare(NodeId::from(3), seq, digest, &network, &mut oddities);
        }

        // slot 2 commits first, but must wait for slot 1
        let actions = commit(&mut epoch, &mut oddities, second, d2);
        assert!(actions.commit.is_empty());
        let actions = commit(&mut epoch, &mut oddities, first, d1);
        let delivered: Vec<_> = actions.commit.iter().map(|c| u64::from(c.seq_no)).collect();
        assert_eq!(delivered, vec![1, 2]);
    }

    #[test]
    fn test_watermark_motion_discards_concluded_slots() {
        let network = network();
        let mut oddities = Oddities::new();
        let mut epoch = epoch_for(0, &network);
        let seq_no = SeqNo::from(1);
        let digest = preprepare(&mut epoch, &network, &mut oddities, seq_no);
        epoch.apply_prepare(NodeId::from(0), seq_no, digest, &network, &mut oddities);
        epoch.apply_prepare(NodeId::from(3), seq_no, digest, &network, &mut oddities);
        for id in 0..3u32 {
            epoch.apply_commit(NodeId::from(id), seq_no, digest, &network, &mut oddities);
        }

        let clients = ClientWindows::new();
        epoch.move_watermarks(SeqNo::from(5), &network, &clients);

        assert_eq!(epoch.low_watermark(), SeqNo::from(5));
        assert_eq!(epoch.high_watermark(&network), SeqNo::from(20));
        assert!(epoch.sequence_summary().is_empty());
        assert!(!epoch.in_window(SeqNo::from(5), &network));
        assert!(epoch.in_window(SeqNo::from(6), &network));
    }

    #[test]
    fn test_suspect_after_stalled_progress() {
        let network = network();
        let mut oddities = Oddities::new();
        let mut epoch = epoch_for(0, &network);
        let clients = ClientWindows::new();

        // nothing in flight: ticking never suspects
        for _ in 0..8 {
            let actions = epoch.tick(&network, &clients, 4);
            assert!(!actions
                .broadcast
                .iter()
                .any(|m| matches!(m, SystemMessage::Suspect { .. })));
        }

        // a stalled pre-prepared slot eventually raises suspicion
        let seq_no = SeqNo::from(1);
        preprepare(&mut epoch, &network, &mut oddities, seq_no);
        let mut suspected = 0;
        for _ in 0..4 {
            let actions = epoch.tick(&network, &clients, 4);
            suspected += actions
                .broadcast
                .iter()
                .filter(|m| matches!(m, SystemMessage::Suspect { epoch } if *epoch == Epoch::from(1)))
                .count();
        }
        assert_eq!(suspected, 1);

        // and only once
        let actions = epoch.tick(&network, &clients, 4);
        assert!(!actions
            .broadcast
            .iter()
            .any(|m| matches!(m, SystemMessage::Suspect { .. })));
    }
}
