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

//! # Transaction Relay 🕸️
//!
//! Submits Ombu transactions on behalf of anonymous clients, paying the gas
//! from the relayer account.
//!
//! [`MembershipCoordinator::join`] is the only path that creates membership
//! records. It walks every join through
//! `Received -> PreconditionsChecked -> Submitted -> Confirmed -> Recorded`,
//! and reports the chain outcome to the caller even when the off-chain
//! bookkeeping afterwards fails.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{TransactionReceipt, H256, U256, U64};
use tokio::sync::Mutex;
use typed_builder::TypedBuilder;

use ombu_log_reader::ChainLogReader;
use ombu_membership_chain::MembershipChain;
use ombu_relayer_store::{MembershipCache, MembershipStore};
use ombu_relayer_types::serde_decimal::parse_u256;
use ombu_relayer_types::MembershipRecord;
use ombu_relayer_utils::clickable_link::tx_link;
use ombu_relayer_utils::metric::Metrics;
use ombu_relayer_utils::retry::ConstantWithMaxRetryCount;
use ombu_relayer_utils::{probe, Error, Result, RevertReason};

/// Join requests.
pub mod join;
/// Vote relaying.
pub mod vote;

pub use join::{JoinOutcome, JoinRequest, JoinStage};
pub use vote::{VoteOutcome, VoteRequest};

/// Relays membership mutations and votes.
#[derive(Clone, TypedBuilder)]
pub struct MembershipCoordinator {
    chain: Arc<dyn MembershipChain>,
    store: Arc<dyn MembershipStore>,
    cache: Arc<MembershipCache>,
    reader: ChainLogReader,
    metrics: Arc<Mutex<Metrics>>,
    /// How long to wait for a receipt once a transaction is sent.
    #[builder(default = Duration::from_secs(120))]
    receipt_timeout: Duration,
    /// Block explorer used to print transaction links.
    #[builder(default)]
    explorer: Option<url::Url>,
    /// Retries of a block timestamp lookup.
    #[builder(default = 3)]
    max_retry_count: usize,
    /// Pause between those retries.
    #[builder(default = Duration::from_millis(500))]
    retry_interval: Duration,
}

impl MembershipCoordinator {
    /// Fails with [`Error::InsufficientFunds`] when the relayer cannot pay for gas.
    async fn ensure_funded(&self) -> Result<()> {
        let balance = self.chain.relayer_balance().await?;
        self.metrics
            .lock()
            .await
            .relayer_balance_wei
            .set(wei_to_f64(balance));
        if balance.is_zero() {
            tracing::error!("Relayer account has no funds");
            return Err(Error::InsufficientFunds);
        }
        Ok(())
    }

    /// Waits for the receipt of a sent transaction.
    ///
    /// Timing out only stops the wait, the transaction stays in flight.
    async fn confirm(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        let receipt = tokio::time::timeout(
            self.receipt_timeout,
            self.chain.wait_for_receipt(tx_hash),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                tx = %self.link(tx_hash),
                timeout = ?self.receipt_timeout,
                "Stopped waiting for the receipt, the transaction may still be mined",
            );
            Error::ReceiptTimeout { tx_hash }
        })??
        .ok_or(Error::TransactionDropped { tx_hash })?;
        let failed = receipt.status == Some(U64::zero());
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Tx,
            %tx_hash,
            block = ?receipt.block_number,
            finalized = !failed,
            errored = failed,
        );
        if failed {
            return Err(Error::ContractCallReverted {
                reason: RevertReason::StatusFailed,
            });
        }
        Ok(receipt)
    }

    /// Appends a record, returns whether the store now holds it.
    ///
    /// Store failures never fail the request that caused them.
    async fn persist(&self, record: MembershipRecord) -> bool {
        match self.store.append(&record) {
            Ok(()) => true,
            Err(Error::DuplicateMember { .. }) => {
                tracing::debug!(
                    group_id = %record.group_id,
                    commitment = %record.commitment,
                    "Membership record already stored",
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    %e,
                    group_id = %record.group_id,
                    commitment = %record.commitment,
                    tx = %self.link(record.transaction_hash),
                    "Failed to persist the membership record",
                );
                self.metrics
                    .lock()
                    .await
                    .membership_store_write_failures
                    .inc();
                false
            }
        }
    }

    /// Acceptance time of a block in unix milliseconds.
    ///
    /// Records are ordered by block time, so a block whose timestamp cannot
    /// be read reuses the latest acceptance time of its group. The leaf index
    /// then keeps it behind the records already stored.
    async fn accepted_at(&self, group_id: U256, block: u64) -> u64 {
        let backoff = ConstantWithMaxRetryCount::new(
            self.retry_interval,
            self.max_retry_count,
        );
        let task = || async {
            match self.chain.block_timestamp(block).await {
                Ok(Some(seconds)) => Ok(seconds.saturating_mul(1000)),
                Ok(None) => Err(backoff::Error::transient(Error::ContractCall(
                    format!("block {block} is not known yet"),
                ))),
                Err(e) => Err(backoff::Error::transient(e)),
            }
        };
        match backoff::future::retry(backoff, task).await {
            Ok(millis) => millis,
            Err(e) => {
                let latest = self
                    .store
                    .list_by_group(group_id)
                    .map(|records| {
                        records
                            .iter()
                            .map(|r| r.accepted_at)
                            .max()
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
                tracing::warn!(
                    %e,
                    %group_id,
                    block,
                    accepted_at = latest,
                    "Block timestamp unavailable, reusing the latest acceptance time of the group",
                );
                latest
            }
        }
    }

    fn link(&self, tx_hash: H256) -> String {
        tx_link(self.explorer.as_ref(), tx_hash)
    }
}

/// Parses a client supplied identity commitment.
pub fn parse_commitment(value: &str) -> Result<U256> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest(
            "identityCommitment is required".into(),
        ));
    }
    parse_u256(value).ok_or_else(|| {
        Error::InvalidRequest(format!(
            "identityCommitment {value:?} is not a uint256"
        ))
    })
}

fn wei_to_f64(wei: U256) -> f64 {
    ethers::utils::format_units(wei, "wei")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or_default()
}
