//! This module contains the implementation details of `abraxas`.
//!
//! By default, it is hidden to the user, unless explicitly enabled
//! with the feature flag `expose_impl`.

pub mod actions;
pub mod batches;
pub mod checkpoints;
pub mod clients;
pub mod collections;
pub mod core;
pub mod crypto;
pub mod epoch;
pub mod epoch_change;
pub mod error;
pub mod eventlog;
pub mod message;
pub mod oddities;
pub mod ordering;
pub mod persisted;
pub mod proposer;
pub mod queues;
pub mod testengine;
