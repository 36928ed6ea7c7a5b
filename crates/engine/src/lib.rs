//! Grid engine
//!
//! Everything that needs more than one node:
//! - messages, transport and ownership: how nodes talk and who holds a key
//! - [`GridNode`]: one member, participant side of every protocol
//! - [`CommitCoordinator`]: two-phase and total-order commit
//! - [`RecoveryCoordinator`]: operator resolution of in-doubt transactions
//! - [`Cache`], [`Session`], [`TransactionManager`]: the client surface,
//!   including invocation batching
//! - [`Cluster`] and the process-wide manager registry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod cache;
pub mod cluster;
pub mod coordinator;
pub mod messages;
pub mod node;
pub mod outcomes;
pub mod ownership;
pub mod recovery;
pub mod registry;
pub mod sequencer;
pub mod tm;
pub mod transport;
pub mod txn_table;
pub mod votes;

pub use batch::BatchState;
pub use cache::Cache;
pub use cluster::{Cluster, ClusterBuilder, DEFAULT_CACHE};
pub use coordinator::CommitCoordinator;
pub use messages::{
    ClusterMessage, CommitMessage, InvalidateMessage, MessageKind, PrepareRequest,
    RollbackMessage, VoteMessage, VoteOutcome,
};
pub use node::GridNode;
pub use outcomes::RecentOutcomes;
pub use ownership::{
    ConsistentHashOwnership, Membership, OwnerSet, OwnershipProvider, StaticOwnership,
};
pub use recovery::{InDoubtTransaction, RecoveryCoordinator};
pub use registry::{create_manager, kill_manager, manager, managers, GridManager};
pub use sequencer::{SequenceStamp, Sequencer};
pub use tm::{EmbeddedTransactionManager, Session, SuspendedTransaction, TransactionManager};
pub use transport::{InMemoryTransport, MessageHandler, Transport};
pub use txn_table::{TransactionHandle, TransactionTable};
pub use votes::{VoteCollector, VoteRegistry, VoteTally};
