// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]
//! # Relayer Utils Module 🕸️
//!
//! Error types and small helpers shared by every crate of the Ombu relayer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ethers::types::{H256, U256};
use serde::Serialize;

/// Clickable terminal links for transactions.
pub mod clickable_link;
/// Metrics functionality
pub mod metric;
/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;
/// Revert payload decoding.
pub mod revert;

pub use revert::RevertReason;

/// The data source a membership list was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipSource {
    /// The persistent membership store.
    Database,
    /// The volatile, process local membership cache.
    Cache,
    /// The chain, either a contract view or the event log.
    Blockchain,
}

impl std::fmt::Display for MembershipSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Cache => write!(f, "cache"),
            Self::Blockchain => write!(f, "blockchain"),
        }
    }
}

/// An enum of all possible errors that could be encountered during the execution of the Ombu
/// Relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying Http server.
    #[error(transparent)]
    Axum(#[from] axum::Error),
    /// HTTP Error
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWalletError(#[from] ethers::signers::WalletError),
    /// Prometheus registry errors.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Missing Secrets in the config, the relayer cannot sign without a private key.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// The configuration is present but not usable.
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// What is wrong with the configuration.
        reason: String,
    },
    /// The relayer account cannot pay for gas.
    #[error("Relayer account has insufficient funds to pay for gas")]
    InsufficientFunds,
    /// The node refused a log query because the block range is too wide.
    #[error("Block range {from}..{to} is too large for the provider")]
    RangeTooLarge {
        /// First block of the rejected range.
        from: u64,
        /// Exclusive end of the rejected range.
        to: u64,
    },
    /// A log entry could not be decoded into a membership event.
    #[error("Failed to decode membership event: {reason}")]
    Decode {
        /// Decoder error message.
        reason: String,
    },
    /// The commitment is already recorded for this group.
    #[error("Commitment {commitment} is already a member of group {group_id}")]
    DuplicateMember {
        /// The group.
        group_id: U256,
        /// The duplicated commitment.
        commitment: U256,
    },
    /// The group is unknown to the Semaphore contract.
    #[error("Group {group_id} does not exist")]
    GroupNotFound {
        /// The requested group.
        group_id: U256,
    },
    /// The Ombu contract has not created any group yet.
    #[error("No groups exist on the Ombu contract")]
    NoGroups,
    /// A contract call or transaction reverted.
    #[error("Contract call reverted: {reason}")]
    ContractCallReverted {
        /// The decoded reason, or the raw payload if it was not recognized.
        reason: RevertReason,
    },
    /// A contract call failed without revert data.
    #[error("Contract call failed: {0}")]
    ContractCall(String),
    /// The persistent membership store cannot be reached.
    #[error("Membership store unavailable: {reason}")]
    StoreUnavailable {
        /// Underlying storage error.
        reason: String,
    },
    /// The assembled membership list does not reproduce the on-chain root.
    #[error(
        "Group {group_id} state from {origin} is inconsistent: expected root {expected} \
         with {expected_size} members, got root {actual} with {actual_size} members"
    )]
    GroupStateInconsistent {
        /// The group.
        group_id: U256,
        /// The on-chain root.
        expected: U256,
        /// The locally reconstructed root.
        actual: U256,
        /// The on-chain tree size.
        expected_size: u64,
        /// The number of assembled members.
        actual_size: u64,
        /// Where the assembled members came from.
        origin: MembershipSource,
    },
    /// A chain RPC call did not answer in time.
    #[error("Chain request timed out: {0}")]
    ChainTimeout(String),
    /// The transaction was submitted, but the receipt did not arrive in time.
    #[error("Timed out waiting for the receipt of transaction {tx_hash:?}")]
    ReceiptTimeout {
        /// The submitted transaction.
        tx_hash: H256,
    },
    /// The transaction was dropped from the mempool before it was mined.
    #[error("Transaction {tx_hash:?} was dropped before confirmation")]
    TransactionDropped {
        /// The submitted transaction.
        tx_hash: H256,
    },
    /// The identity commitment is not a member of the group.
    #[error("Commitment is not a member of group {group_id}")]
    NotGroupMember {
        /// The group.
        group_id: U256,
    },
    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The membership tree could not be computed.
    #[error("Membership tree error: {0}")]
    MembershipTree(String),
    /// a backgorund task failed and stopped Abnormally.
    #[error("Task Stopped Apnormally")]
    TaskStoppedAbnormally,
}

/// A type alias for the result for ombu relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

impl From<sled::Error> for Error {
    fn from(error: sled::Error) -> Self {
        Error::StoreUnavailable {
            reason: error.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Error::ChainTimeout(error.to_string())
    }
}

impl Error {
    /// A stable, machine checkable category for this error.
    pub fn category(&self) -> &'static str {
        match self {
            Error::MissingSecrets
            | Error::Configuration { .. }
            | Error::Config(_)
            | Error::ParseConfig(_) => "CONFIGURATION_ERROR",
            Error::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Error::RangeTooLarge { .. } => "RANGE_TOO_LARGE",
            Error::Decode { .. } => "DECODE_ERROR",
            Error::DuplicateMember { .. } => "DUPLICATE_MEMBER",
            Error::GroupNotFound { .. } => "GROUP_NOT_FOUND",
            Error::NoGroups => "NO_GROUPS",
            Error::ContractCallReverted { .. } => "CONTRACT_CALL_REVERTED",
            Error::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Error::GroupStateInconsistent { .. } => "GROUP_STATE_INCONSISTENT",
            Error::ChainTimeout(_) | Error::ReceiptTimeout { .. } => "TIMEOUT",
            Error::TransactionDropped { .. } => "TRANSACTION_DROPPED",
            Error::EthersProvider(_) | Error::ContractCall(_) => {
                "NETWORK_ERROR"
            }
            Error::NotGroupMember { .. } => "NOT_A_MEMBER",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same request later can succeed without any change on
    /// the caller side.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::RangeTooLarge { .. }
                | Error::StoreUnavailable { .. }
                | Error::GroupStateInconsistent { .. }
                | Error::ChainTimeout(_)
                | Error::ReceiptTimeout { .. }
                | Error::TransactionDropped { .. }
                | Error::EthersProvider(_)
                | Error::ContractCall(_)
        )
    }

    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotGroupMember { .. } => StatusCode::FORBIDDEN,
            Error::GroupNotFound { .. } | Error::NoGroups => {
                StatusCode::NOT_FOUND
            }
            Error::DuplicateMember { .. } => StatusCode::CONFLICT,
            Error::ContractCallReverted { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::InsufficientFunds => StatusCode::SERVICE_UNAVAILABLE,
            Error::GroupStateInconsistent { .. } => StatusCode::CONFLICT,
            Error::StoreUnavailable { .. }
            | Error::EthersProvider(_)
            | Error::ContractCall(_)
            | Error::TransactionDropped { .. } => StatusCode::BAD_GATEWAY,
            Error::ChainTimeout(_) | Error::ReceiptTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra diagnostic detail, shown to HTTP clients next to the message.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::InsufficientFunds => Some(
                "The relayer wallet needs to be funded before it can submit transactions"
                    .to_string(),
            ),
            Error::GroupNotFound { .. } => Some(
                "The group must be created on the Semaphore contract before members can join"
                    .to_string(),
            ),
            Error::ContractCallReverted { reason } => match reason {
                RevertReason::Unknown(data) => {
                    Some(format!("0x{}", hex::encode(data)))
                }
                other => Some(other.name().to_string()),
            },
            Error::GroupStateInconsistent { .. } => Some(
                "The membership list could not be reconciled with the on-chain root, retry shortly"
                    .to_string(),
            ),
            Error::ReceiptTimeout { .. } => Some(
                "The transaction was submitted and may still be confirmed".to_string(),
            ),
            _ => None,
        }
    }
}

/// Body of every error response of the HTTP API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Stable error category.
    pub error: String,
    /// Human readable message.
    pub message: String,
    /// Optional diagnostic detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Optional machine readable code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<Error> for HandlerError {
    fn from(value: Error) -> Self {
        let status = value.status_code();
        HandlerError(
            status,
            ErrorResponse {
                error: value.category().to_string(),
                message: value.to_string(),
                details: value.details(),
                code: Some(status.as_u16().to_string()),
            },
        )
    }
}

/// Error type for HTTP handlers
#[derive(Debug)]
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response body
    pub ErrorResponse,
);

impl HandlerError {
    /// Creates an error response with a category and a message.
    pub fn new(
        status: StatusCode,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        HandlerError(
            status,
            ErrorResponse {
                error: error.into(),
                message: message.into(),
                details: None,
                code: None,
            },
        )
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}
