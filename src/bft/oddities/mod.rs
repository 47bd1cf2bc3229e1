//! Accounting of tolerated peer misbehavior.
//!
//! Oddities are events which are not necessarily damaging or
//! detrimental to the replica, but which may represent byzantine
//! behavior, misconfiguration, or bugs. They are counted per sender
//! and logged; they never alter control flow.

use intmap::IntMap;
use tracing::{debug, error};

use crate::bft::message::NodeId;

/// Counters for one peer.
#[derive(Default, Debug, Copy, Clone)]
#[cfg_attr(
    feature = "serialize_serde",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OddityCounts {
    pub invalid: u64,
    pub already_processed: u64,
    // reserved, currently unused:
    // pub above_watermarks: u64,
    // pub below_watermarks: u64,
    // pub wrong_epoch: u64,
}

/// Per-sender oddity accounting.
pub struct Oddities {
    nodes: IntMap<OddityCounts>,
}

impl Oddities {
    pub fn new() -> Self {
        Self {
            nodes: IntMap::new(),
        }
    }

    fn node(&mut self, id: NodeId) -> &mut OddityCounts {
        let key = u64::from(id);
        if !self.nodes.contains_key(key) {
            self.nodes.insert(key, OddityCounts::default());
        }
        match self.nodes.get_mut(key) {
            Some(counts) => counts,
            None => unreachable!("just inserted"),
        }
    }

    /// A message that contradicts protocol state, e.g. a pre-prepare
    /// from a replica that does not lead the slot's bucket, or a vote
    /// whose digest does not match the local one.
    pub fn invalid_message(&mut self, source: NodeId, kind: &'static str) {
        error!(source = u64::from(source), kind, "invalid message");
        self.node(source).invalid += 1;
    }

    /// A duplicate of something already applied. Common under
    /// retransmission; logged quietly.
    pub fn already_processed(&mut self, source: NodeId, kind: &'static str) {
        debug!(source = u64::from(source), kind, "already processed message");
        self.node(source).already_processed += 1;
    }

    /// The counters recorded against `source` so far.
    pub fn counts(&self, source: NodeId) -> OddityCounts {
        self.nodes
            .get(u64::from(source))
            .copied()
            .unwrap_or_default()
    }
}
