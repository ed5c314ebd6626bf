use std::fmt;
use std::io;

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::types::MutationKind;

/// Failures reported by the external chain client.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Networking, RPC timeouts or unexpected node responses.
    #[error("transport error: {0}")]
    Transport(String),
    /// The signer declined the request or the node refused to broadcast it.
    #[error("submission rejected: {0}")]
    Rejected(String),
    /// The transaction was mined but the contract call reverted.
    #[error("execution reverted: {0}")]
    Reverted(String),
    /// A response payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The client or stream has been shut down.
    #[error("chain client closed")]
    Closed,
}

impl ClientError {
    pub fn transport(error: impl fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }

    pub fn decode(error: impl fmt::Display) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Bad local input. Never reaches the network.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount is required")]
    EmptyAmount,
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("malformed amount `{0}`")]
    MalformedAmount(String),
    #[error("malformed address `{0}`")]
    MalformedAddress(String),
    #[error("no wallet connected")]
    WalletDisconnected,
}

/// The write never made it on-chain.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("signing or broadcast rejected: {0}")]
    Rejected(String),
    #[error("chain client unavailable: {0}")]
    Unavailable(String),
}

/// The write was mined and reverted, or its outcome could not be observed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("transaction {hash} reverted")]
    Reverted { hash: TxHash },
    #[error("transaction {hash} outcome unknown: {reason}")]
    Unconfirmed { hash: TxHash, reason: String },
}

/// A query failed; the cache keeps serving the previous value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("read `{call}` failed: {source}")]
pub struct ReadError {
    pub call: &'static str,
    #[source]
    pub source: ClientError,
}

impl ReadError {
    pub fn new(call: &'static str, source: ClientError) -> Self {
        Self { call, source }
    }
}

/// Terminal failure of a tracked write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MutationFailure {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Coarse failure category surfaced to users.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCategory {
    Rejected,
    Reverted,
    /// Broadcast, but no receipt was observed before giving up.
    Unconfirmed,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::Rejected => write!(f, "rejected"),
            FailureCategory::Reverted => write!(f, "reverted on-chain"),
            FailureCategory::Unconfirmed => write!(f, "outcome unknown"),
        }
    }
}

impl MutationFailure {
    pub fn category(&self) -> FailureCategory {
        match self {
            MutationFailure::Submission(_) => FailureCategory::Rejected,
            MutationFailure::Execution(ExecutionError::Reverted { .. }) => {
                FailureCategory::Reverted
            }
            MutationFailure::Execution(ExecutionError::Unconfirmed { .. }) => {
                FailureCategory::Unconfirmed
            }
        }
    }

    /// Human readable hint for the failure notification.
    pub fn user_hint(&self, kind: MutationKind) -> String {
        match self {
            // The write may still land; the authorization hint would be misleading.
            MutationFailure::Execution(ExecutionError::Unconfirmed { hash, .. }) => format!(
                "Transaction {hash} was broadcast but not confirmed; check it before retrying ({})",
                self.category()
            ),
            _ => format!("{} ({})", failure_hint(kind), self.category()),
        }
    }

    /// Classifies a client error observed while submitting a write.
    pub fn from_submission(error: ClientError) -> Self {
        match error {
            ClientError::Rejected(reason) | ClientError::Reverted(reason) => {
                SubmissionError::Rejected(reason).into()
            }
            other => SubmissionError::Unavailable(other.to_string()).into(),
        }
    }
}

fn failure_hint(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::DepositEth | MutationKind::DepositErc20 => {
            "Transaction was rejected or failed"
        }
        MutationKind::Withdraw => "Only owner can withdraw or insufficient balance",
        MutationKind::GrantAgent => "Only owner can grant agent status",
        MutationKind::RevokeAgent => "Only owner can revoke agent status",
        MutationKind::Harvest => "Only agents can harvest yield",
        MutationKind::Rebalance => "Only agents can rebalance",
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_rejections_are_not_reverts() {
        let failure = MutationFailure::from_submission(ClientError::Rejected("user denied".into()));
        assert_eq!(failure.category(), FailureCategory::Rejected);
        assert_eq!(
            failure.user_hint(MutationKind::DepositEth),
            "Transaction was rejected or failed (rejected)"
        );

        let offline = MutationFailure::from_submission(ClientError::Transport("timeout".into()));
        assert!(matches!(
            offline,
            MutationFailure::Submission(SubmissionError::Unavailable(_))
        ));
    }

    #[test]
    fn reverts_carry_the_operation_hint() {
        let failure: MutationFailure = ExecutionError::Reverted {
            hash: TxHash::ZERO,
        }
        .into();
        assert_eq!(
            failure.user_hint(MutationKind::Withdraw),
            "Only owner can withdraw or insufficient balance (reverted on-chain)"
        );
    }

    #[test]
    fn unobserved_outcomes_are_not_reported_as_reverts() {
        let failure: MutationFailure = ExecutionError::Unconfirmed {
            hash: TxHash::ZERO,
            reason: "no receipt".into(),
        }
        .into();
        assert_eq!(failure.category(), FailureCategory::Unconfirmed);
        let hint = failure.user_hint(MutationKind::Withdraw);
        assert!(hint.ends_with("(outcome unknown)"));
        assert!(!hint.contains("Only owner"));
    }
}
