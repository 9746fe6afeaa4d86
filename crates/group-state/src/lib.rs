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

//! # Group State Assembler
//!
//! Builds the ordered membership list of a group and checks it against the
//! Semaphore contract before anyone can generate a proof from it.
//!
//! Members are read from the first source that has any, in this order:
//!
//! 1. the persistent membership store,
//! 2. the volatile membership cache,
//! 3. a fresh scan of the `MemberAdded` event log.
//!
//! Whatever the source, the list is fed through the Lean IMT and the
//! resulting root must equal the root reported by the contract. A mismatch is
//! an error, it never falls through to the next source.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use ethers::types::U256;
use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::Mutex;

use ombu_log_reader::ChainLogReader;
use ombu_membership_chain::{latest_group, MembershipChain};
use ombu_membership_tree::compute_root;
use ombu_relayer_store::{MembershipCache, MembershipStore};
use ombu_relayer_types::{
    serde_decimal, AccumulatorState, GroupSnapshot, MembershipSource,
};
use ombu_relayer_utils::metric::Metrics;
use ombu_relayer_utils::{probe, Error, Result};

#[cfg(test)]
mod tests;

/// A group registered on the Ombu contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    /// The Semaphore group id.
    #[serde(with = "serde_decimal")]
    pub group_id: U256,
    /// The display name.
    pub name: String,
}

/// Every group of the Ombu contract, in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupList {
    /// `groupCounter()`
    pub total_groups: u64,
    /// The groups.
    pub groups: Vec<GroupSummary>,
}

/// Assembles [`GroupSnapshot`]s.
#[derive(Clone)]
pub struct GroupStateAssembler {
    chain: Arc<dyn MembershipChain>,
    store: Arc<dyn MembershipStore>,
    cache: Arc<MembershipCache>,
    reader: ChainLogReader,
    metrics: Arc<Mutex<Metrics>>,
}

impl GroupStateAssembler {
    /// Creates an assembler.
    pub fn new(
        chain: Arc<dyn MembershipChain>,
        store: Arc<dyn MembershipStore>,
        cache: Arc<MembershipCache>,
        reader: ChainLogReader,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            chain,
            store,
            cache,
            reader,
            metrics,
        }
    }

    /// Builds the validated snapshot of a group.
    ///
    /// Fails with [`Error::GroupNotFound`] for unknown groups and with
    /// [`Error::GroupStateInconsistent`] when the assembled members do not
    /// reproduce the on-chain root.
    #[tracing::instrument(skip(self))]
    pub async fn assemble(&self, group_id: U256) -> Result<GroupSnapshot> {
        // the root is what proofs are verified against, never cache it
        let accumulator = self.chain.accumulator(group_id).await?;
        let (members, source) =
            self.ordered_members(group_id, &accumulator).await?;
        let actual = compute_root(&members)?;
        let actual_size = members.len() as u64;
        if actual != accumulator.root || actual_size != accumulator.size {
            self.metrics.lock().await.group_state_inconsistent.inc();
            let error = Error::GroupStateInconsistent {
                group_id,
                expected: accumulator.root,
                actual,
                expected_size: accumulator.size,
                actual_size,
                origin: source,
            };
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::GroupState,
                %group_id,
                %source,
                expected = ?accumulator.root,
                actual = ?actual,
                expected_size = accumulator.size,
                actual_size,
                consistent = false,
            );
            tracing::error!(%error, "Assembled group state does not match the chain");
            return Err(error);
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::GroupState,
            %group_id,
            %source,
            size = actual_size,
            consistent = true,
        );
        self.cache.set(group_id, members.clone());
        Ok(GroupSnapshot {
            group_id,
            root: accumulator.root,
            depth: accumulator.depth,
            size: accumulator.size,
            ordered_commitments: members,
            source,
        })
    }

    async fn ordered_members(
        &self,
        group_id: U256,
        accumulator: &AccumulatorState,
    ) -> Result<(Vec<U256>, MembershipSource)> {
        match self.store.list_by_group(group_id) {
            Ok(records) if !records.is_empty() => {
                let members =
                    records.into_iter().map(|r| r.commitment).collect();
                return Ok((members, MembershipSource::Database));
            }
            Ok(_) => {
                tracing::debug!(%group_id, "No stored members");
            }
            Err(e) => {
                tracing::warn!(
                    %e,
                    %group_id,
                    "Membership store unavailable, falling back to the cache",
                );
            }
        }
        if let Some(members) =
            self.cache.get(group_id).filter(|m| !m.is_empty())
        {
            return Ok((members, MembershipSource::Cache));
        }
        if accumulator.size == 0 {
            return Ok((Vec::new(), MembershipSource::Blockchain));
        }
        tracing::info!(%group_id, "Reading members from the chain log");
        let members = self
            .reader
            .scan_group(group_id)
            .await?
            .into_iter()
            .map(|m| m.commitment)
            .collect();
        Ok((members, MembershipSource::Blockchain))
    }

    /// Whether a commitment belongs to a group.
    ///
    /// The store answers positively on its own, anything else is asked to
    /// the Ombu contract.
    pub async fn is_member(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> Result<(bool, MembershipSource)> {
        match self.store.contains(group_id, commitment) {
            Ok(true) => return Ok((true, MembershipSource::Database)),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    %e,
                    %group_id,
                    "Membership store unavailable, asking the chain",
                );
            }
        }
        let is_member = self.chain.is_member(group_id, commitment).await?;
        Ok((is_member, MembershipSource::Blockchain))
    }

    /// The groups registered on the Ombu contract.
    pub async fn list_groups(&self) -> Result<GroupList> {
        let counter = self.chain.group_counter().await?;
        let total_groups = u64::try_from(counter).map_err(|_| {
            Error::ContractCall(format!("group counter {counter} out of range"))
        })?;
        let groups = try_join_all((0..total_groups).map(|index| async move {
            let group_id = self.chain.group_at(U256::from(index)).await?;
            let name = self.chain.group_name(group_id).await?;
            Ok::<_, Error>(GroupSummary { group_id, name })
        }))
        .await?;
        Ok(GroupList {
            total_groups,
            groups,
        })
    }

    /// The most recently created Ombu group.
    ///
    /// Fails with [`Error::NoGroups`] when the contract has none.
    pub async fn latest_group(&self) -> Result<U256> {
        latest_group(self.chain.as_ref()).await
    }
}
