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

//! # Chain Log Reader
//!
//! Reads the `MemberAdded` events of one Semaphore group from the chain.
//!
//! A single [`ChainLogReader::read`] is one `eth_getLogs` call. Providers
//! commonly refuse wide block ranges, so [`ChainLogReader::scan`] walks a
//! range in windows that shrink every time the provider complains, and
//! retries transient RPC failures a bounded number of times.
//!
//! The node does not guarantee that log order equals insertion order, every
//! scan result is therefore explicitly sorted by the on-chain leaf index.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Log, H256, U256};
use tokio::sync::Mutex;
use typed_builder::TypedBuilder;

use ombu_membership_chain::{
    decode_member_added, member_added_signature, LogQuery, MembershipChain,
};
use ombu_relayer_types::ChainMemberRecord;
use ombu_relayer_utils::metric::Metrics;
use ombu_relayer_utils::probe;
use ombu_relayer_utils::retry::{ConstantWithMaxRetryCount, HalvingWindow};
use ombu_relayer_utils::{Error, Result};


/// Size of the window scanned when a full scan keeps being refused.
pub const FALLBACK_WINDOW: u64 = 1000;

/// How a [`ChainLogReader`] splits and retries its queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct ScanPolicy {
    /// Widest window, in blocks, asked from the provider at once.
    #[builder(default = 10_000)]
    pub max_blocks_per_step: u64,
    /// Narrowest window. A range error at this size is given up on.
    #[builder(default = 1)]
    pub min_blocks_per_step: u64,
    /// How far back a group scan starts when the deployment block is unknown.
    #[builder(default = 50_000)]
    pub lookback_blocks: u64,
    /// Retries of a transient RPC failure before it is returned.
    #[builder(default = 3)]
    pub max_retry_count: usize,
    /// Pause between those retries.
    #[builder(default = Duration::from_millis(500))]
    pub retry_interval: Duration,
    /// Block the Semaphore contract was deployed at.
    #[builder(default, setter(strip_option))]
    pub deployed_at: Option<u64>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The decoded `MemberAdded` events of one query.
///
/// Decoding happens while iterating. Entries that fail to decode, or that
/// belong to another group, are logged and skipped.
#[derive(Debug)]
pub struct MemberAddedLogs {
    group_id: U256,
    logs: std::vec::IntoIter<Log>,
}

impl MemberAddedLogs {
    fn new(group_id: U256, logs: Vec<Log>) -> Self {
        Self {
            group_id,
            logs: logs.into_iter(),
        }
    }

    fn empty(group_id: U256) -> Self {
        Self::new(group_id, Vec::new())
    }
}

impl Iterator for MemberAddedLogs {
    type Item = ChainMemberRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for log in self.logs.by_ref() {
            match decode_member_added(&log) {
                Ok(member) if member.group_id == self.group_id => {
                    return Some(member)
                }
                Ok(member) => {
                    tracing::warn!(
                        expected = %self.group_id,
                        got = %member.group_id,
                        "Skipping MemberAdded log of another group",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        %e,
                        tx = ?log.transaction_hash,
                        block = ?log.block_number,
                        "Skipping malformed MemberAdded log",
                    );
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.logs.len()))
    }
}

/// Reads `MemberAdded` events of the Semaphore contract.
#[derive(Clone)]
pub struct ChainLogReader {
    chain: Arc<dyn MembershipChain>,
    policy: ScanPolicy,
    metrics: Arc<Mutex<Metrics>>,
}

impl ChainLogReader {
    /// Creates a reader over `chain`.
    pub fn new(
        chain: Arc<dyn MembershipChain>,
        policy: ScanPolicy,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            chain,
            policy,
            metrics,
        }
    }

    /// The policy this reader scans with.
    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Runs one log query over the half-open block range `range`.
    ///
    /// An empty range yields nothing and does not reach the chain.
    pub async fn read(
        &self,
        group_id: U256,
        signature: H256,
        range: Range<u64>,
    ) -> Result<MemberAddedLogs> {
        if range.is_empty() {
            return Ok(MemberAddedLogs::empty(group_id));
        }
        let query = LogQuery {
            address: self.chain.semaphore_address(),
            signature,
            group_id,
            from_block: range.start,
            to_block: range.end - 1,
        };
        let logs = self.chain.logs(&query).await?;
        tracing::trace!(
            %group_id,
            from = range.start,
            to = range.end,
            found = logs.len(),
            "Queried MemberAdded logs",
        );
        Ok(MemberAddedLogs::new(group_id, logs))
    }

    /// [`Self::read`], retrying transient failures. Range errors are returned
    /// right away, narrowing is up to the caller.
    async fn read_with_retry(
        &self,
        group_id: U256,
        signature: H256,
        range: Range<u64>,
    ) -> Result<Vec<ChainMemberRecord>> {
        let backoff = ConstantWithMaxRetryCount::new(
            self.policy.retry_interval,
            self.policy.max_retry_count,
        );
        let task = || async {
            self.read(group_id, signature, range.clone())
                .await
                .map(|logs| logs.collect::<Vec<_>>())
                .map_err(|e| match e {
                    Error::RangeTooLarge { .. } => backoff::Error::permanent(e),
                    e if e.is_recoverable() => {
                        tracing::event!(
                            target: probe::TARGET,
                            tracing::Level::DEBUG,
                            kind = %probe::Kind::Retry,
                            %group_id,
                            from = range.start,
                            to = range.end,
                            error = %e,
                        );
                        backoff::Error::transient(e)
                    }
                    e => backoff::Error::permanent(e),
                })
        };
        backoff::future::retry(backoff, task).await
    }

    /// Reads every `MemberAdded` event of `group_id` in `range`, ordered by
    /// leaf index and without duplicated indices.
    ///
    /// Fails with [`Error::RangeTooLarge`] only when the provider refuses even
    /// the narrowest allowed window.
    #[tracing::instrument(skip(self))]
    pub async fn scan(
        &self,
        group_id: U256,
        range: Range<u64>,
    ) -> Result<Vec<ChainMemberRecord>> {
        let signature = member_added_signature();
        let mut window = HalvingWindow::new(
            self.policy.max_blocks_per_step,
            self.policy.min_blocks_per_step,
        );
        let mut members = Vec::new();
        let mut cursor = range.start;
        while cursor < range.end {
            let step_end = cursor.saturating_add(window.size()).min(range.end);
            match self
                .read_with_retry(group_id, signature, cursor..step_end)
                .await
            {
                Ok(found) => {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::TRACE,
                        kind = %probe::Kind::Sync,
                        %group_id,
                        from = cursor,
                        to = step_end,
                        found = found.len(),
                    );
                    members.extend(found);
                    cursor = step_end;
                }
                Err(e @ Error::RangeTooLarge { .. }) => {
                    if !window.narrow() {
                        tracing::warn!(
                            %e,
                            window = window.size(),
                            "Provider refuses the narrowest window",
                        );
                        return Err(e);
                    }
                    self.metrics.lock().await.log_reader_range_narrowed.inc();
                    tracing::debug!(
                        %e,
                        window = window.size(),
                        "Narrowing the log query window",
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ordered(members))
    }

    /// Scans a group from the Semaphore deployment block (or the configured
    /// lookback) up to the latest block.
    ///
    /// If the provider refuses every window of that scan and the narrowest
    /// window is wider than [`FALLBACK_WINDOW`], only the last
    /// [`FALLBACK_WINDOW`] blocks are read.
    pub async fn scan_group(
        &self,
        group_id: U256,
    ) -> Result<Vec<ChainMemberRecord>> {
        let latest = self.chain.latest_block_number().await?;
        let start = self.policy.deployed_at.unwrap_or_else(|| {
            latest.saturating_sub(self.policy.lookback_blocks)
        });
        let end = latest.saturating_add(1);
        // a floor at or below the fallback window was already refused
        let floor = self.policy.min_blocks_per_step.max(1);
        match self.scan(group_id, start..end).await {
            Err(Error::RangeTooLarge { from, to }) if FALLBACK_WINDOW < floor => {
                let fallback = end.saturating_sub(FALLBACK_WINDOW).max(start)..end;
                tracing::warn!(
                    %group_id,
                    refused_from = from,
                    refused_to = to,
                    from = fallback.start,
                    to = fallback.end,
                    "Falling back to the most recent blocks only",
                );
                let found = self
                    .read_with_retry(
                        group_id,
                        member_added_signature(),
                        fallback,
                    )
                    .await?;
                Ok(ordered(found))
            }
            result => result,
        }
    }

    /// Finds the `MemberAdded` event of one commitment.
    pub async fn find_member(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> Result<Option<ChainMemberRecord>> {
        let members = self.scan_group(group_id).await?;
        Ok(members
            .into_iter()
            .find(|member| member.commitment == commitment))
    }
}

/// Sorts by leaf index (then block and log index) and keeps the first event
/// of every leaf index.
fn ordered(mut members: Vec<ChainMemberRecord>) -> Vec<ChainMemberRecord> {
    members.sort_by_key(ChainMemberRecord::sort_key);
    members.dedup_by_key(|member| member.chain_index);
    members
}
