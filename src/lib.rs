//! # abraxas
//!
//! A deterministic Mir-style BFT ordering core in Rust!
//!
//! This crate implements the replica automaton of a multi-leader
//! byzantine fault tolerant state machine replication protocol. The
//! automaton is pure: it consumes protocol messages, client requests,
//! timer ticks and the results of externally performed work (hashing,
//! persistence), and emits a batch of [`Actions`] for the host to
//! carry out. It performs no I/O, spawns no tasks, and reads no
//! clocks, which makes runs reproducible from a recorded event log.
//!
//! The entry point is [`StateMachine`]; drive it with
//! [`StateMachine::step`], [`StateMachine::propose`],
//! [`StateMachine::process_results`] and [`StateMachine::tick`].

#[cfg(feature = "expose_impl")]
pub mod bft;

#[cfg(not(feature = "expose_impl"))]
pub(crate) mod bft;

pub use crate::bft::actions::{
    ActionResults,
    Actions,
    CheckpointResult,
    CommitEntry,
    HashPurpose,
    HashRequest,
    HashResult,
};
pub use crate::bft::core::{
    BucketStatus,
    CheckpointStatus,
    ClientWindowStatus,
    EpochChangerStatus,
    EpochTargetStatus,
    NetworkConfig,
    NodeStatus,
    ReplicaConfig,
    SequenceStatus,
    StateMachine,
    Status,
};
pub use crate::bft::crypto::hash::{
    Context,
    Digest,
};
pub use crate::bft::epoch::{
    EpochConfig,
    SeqPhase,
};
pub use crate::bft::epoch_change::TargetState;
pub use crate::bft::error::{
    Error,
    ErrorKind,
    Result,
    ResultSimpleExt,
    ResultWrappedExt,
};
pub use crate::bft::eventlog::{
    Event,
    EventLog,
    LogEntry,
};
pub use crate::bft::message::{
    Checkpoint,
    Chunks,
    ClientId,
    ConsensusMessage,
    ConsensusMessageKind,
    EpochChange,
    NewEpoch,
    NewEpochConfig,
    NodeId,
    PEntry,
    QEntry,
    Request,
    RequestAck,
    SystemMessage,
};
pub use crate::bft::oddities::OddityCounts;
pub use crate::bft::ordering::{
    Epoch,
    Orderable,
    ReqNo,
    SeqNo,
};
pub use crate::bft::persisted::Entry as PersistedEntry;
pub use crate::bft::testengine::Engine;
