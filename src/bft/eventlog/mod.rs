//! Recorded runs of the replica automaton.
//!
//! Because the automaton is deterministic, a run is fully described
//! by its configuration plus the ordered list of external events each
//! replica consumed. Two recordings of the same run must be equal; if
//! they are not, `first_divergence` points at the earliest entry
//! where nondeterminism crept in.
//!
//! Serialization of a log is left to the host (everything here
//! derives `serde` under the `serialize_serde` feature).

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::bft::core::{NetworkConfig, ReplicaConfig};
use crate::bft::message::{NodeId, Request, SystemMessage};

/// One external stimulus consumed by a replica.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Event {
    /// A timer tick.
    Tick,
    /// A request taken from this replica's client.
    Propose(Request),
    /// A protocol message received from a peer.
    Receive {
        source: NodeId,
        msg: SystemMessage,
    },
}

/// An event, addressed and timestamped.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct LogEntry {
    pub target: NodeId,
    pub time: u64,
    pub event: Event,
}

/// A recorded run: the configuration it started from, and every
/// event in delivery order.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EventLog {
    pub name: String,
    pub description: String,
    pub initial_config: NetworkConfig,
    pub node_configs: Vec<ReplicaConfig>,
    pub entries: Vec<LogEntry>,
}

impl EventLog {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        initial_config: NetworkConfig,
        node_configs: Vec<ReplicaConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            initial_config,
            node_configs,
            entries: Vec::new(),
        }
    }

    /// Inserts an entry in time order, after existing entries with
    /// the same timestamp.
    pub fn insert(&mut self, entry: LogEntry) {
        let position = self
            .entries
            .iter()
            .position(|existing| existing.time > entry.time)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }

    /// Inserts a tick for `target` at `time`.
    pub fn insert_tick(&mut self, target: NodeId, time: u64) {
        self.insert(LogEntry {
            target,
            time,
            event: Event::Tick,
        });
    }

    /// The index of the first entry where the two logs disagree, or
    /// `None` when one is a prefix of the other (equal length means
    /// equal logs). Configurations must match before entries are
    /// worth comparing.
    pub fn first_divergence(&self, other: &EventLog) -> Option<usize> {
        self.entries
            .iter()
            .zip(other.entries.iter())
            .position(|(mine, theirs)| mine != theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> EventLog {
        let network = NetworkConfig::standard(7);
        let node_configs = vec![ReplicaConfig {
            id: NodeId::from(0),
            batch_size: 1,
            heartbeat_ticks: 2,
            suspect_ticks: 4,
            new_epoch_timeout_ticks: 8,
        }];
        let mut log = EventLog::new("fake-name", "fake-description", network, node_configs);
        log.insert_tick(NodeId::from(1), 10);
        log.insert_tick(NodeId::from(2), 20);
        log
    }

    #[cfg(feature = "serialize_serde")]
    #[test]
    fn test_round_trip() {
        let log = sample_log();
        let bytes = bincode::serialize(&log).expect("serialize failed");
        let read: EventLog = bincode::deserialize(&bytes).expect("deserialize failed");

        assert_eq!(read.name, "fake-name");
        assert_eq!(read.description, "fake-description");
        assert_eq!(read.initial_config, log.initial_config);
        assert_eq!(read.node_configs, log.node_configs);
        assert_eq!(read.entries.len(), 2);
        assert_eq!(read.entries[0], log.entries[0]);
        assert_eq!(read.entries[1], log.entries[1]);
        assert_eq!(read.entries.get(2), None);
    }

    #[test]
    fn test_insert_keeps_time_order() {
        let mut log = sample_log();
        log.insert_tick(NodeId::from(3), 15);
        let times: Vec<u64> = log.entries.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![10, 15, 20]);
    }

    #[test]
    fn test_first_divergence() {
        let log = sample_log();
        let mut other = log.clone();
        assert_eq!(log.first_divergence(&other), None);

        other.entries[1].target = NodeId::from(5);
        assert_eq!(log.first_divergence(&other), Some(1));
    }
}
