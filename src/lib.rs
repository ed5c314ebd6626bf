//! Client-side sync layer for the DeFi agent vault.
//!
//! [`session::VaultSession`] wires the pieces for one UI session: the
//! [`gateway::RemoteCallGateway`] talks to the chain through a
//! [`gateway::ChainClient`], [`cache::VaultStateCache`] keeps the last known
//! vault metrics and user position, [`tracker::TransactionTracker`] drives
//! writes to a terminal state, and [`events::EventSubscriptionManager`]
//! reacts to on-chain events. User-facing messages flow through
//! [`notify::NotificationDispatcher`].

pub mod cache;
pub mod config;
pub mod contract;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod notify;
pub mod session;
pub mod tracker;
pub mod types;

pub use cache::{VaultSnapshot, VaultStateCache};
pub use config::{RefreshStrategy, VaultSyncConfig};
pub use errors::{ClientError, MutationFailure, ReadError, ValidationError};
pub use events::EventSubscriptionManager;
pub use gateway::rpc::JsonRpcChainClient;
pub use gateway::{ChainClient, RemoteCallGateway};
pub use notify::{Notification, NotificationDispatcher, NotificationSink};
pub use session::VaultSession;
pub use tracker::{MutationIntent, TrackedTransaction, TransactionTracker};
pub use types::{ChainContext, MutationKind, PendingTransaction, TxStatus, UserPosition, VaultState};
