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

use derive_more::Display;
use ethers::types::{H256, U256};
use serde::Deserialize;

use ombu_membership_chain::{latest_group, member_added_in_receipt};
use ombu_relayer_types::{serde_decimal, MembershipRecord};
use ombu_relayer_utils::{probe, Error, Result, RevertReason};

use super::{parse_commitment, MembershipCoordinator};

/// Body of `POST /join`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// The identity commitment, decimal or `0x` hex.
    #[serde(default)]
    pub identity_commitment: String,
    /// The target group, the latest Ombu group when absent.
    #[serde(default, with = "serde_decimal::option")]
    pub group_id: Option<U256>,
}

/// The stages a join goes through.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum JoinStage {
    /// The request was parsed.
    #[display(fmt = "received")]
    Received,
    /// The relayer is funded, the group exists and the commitment is new.
    #[display(fmt = "preconditions_checked")]
    PreconditionsChecked,
    /// `addMember` was sent.
    #[display(fmt = "submitted")]
    Submitted,
    /// The transaction was mined successfully.
    #[display(fmt = "confirmed")]
    Confirmed,
    /// Off-chain bookkeeping is done.
    #[display(fmt = "recorded")]
    Recorded,
    /// A precondition or the chain refused the join.
    #[display(fmt = "rejected")]
    Rejected,
}

/// How a join ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The commitment was inserted by this request.
    Joined {
        /// The group joined.
        group_id: U256,
        /// The `addMember` transaction.
        transaction_hash: H256,
        /// Block the transaction was mined in.
        block_number: Option<u64>,
        /// Whether a membership record was stored.
        recorded: bool,
    },
    /// The commitment was already a member, nothing was sent.
    AlreadyMember {
        /// The group.
        group_id: U256,
        /// Whether a missing record was recovered from the chain log.
        backfilled: bool,
    },
}

impl JoinOutcome {
    /// The group of the join.
    pub fn group_id(&self) -> U256 {
        match self {
            Self::Joined { group_id, .. } | Self::AlreadyMember { group_id, .. } => {
                *group_id
            }
        }
    }
}

fn stage(stage: JoinStage, group_id: Option<U256>, commitment: U256) {
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Join,
        %stage,
        group_id = ?group_id,
        %commitment,
    );
}

impl MembershipCoordinator {
    /// Adds an identity commitment to a group.
    ///
    /// Joining twice is not an error, the second join reports
    /// [`JoinOutcome::AlreadyMember`].
    #[tracing::instrument(skip_all)]
    pub async fn join(&self, request: JoinRequest) -> Result<JoinOutcome> {
        let commitment = parse_commitment(&request.identity_commitment)?;
        stage(JoinStage::Received, request.group_id, commitment);

        let group_id = match request.group_id {
            Some(group_id) => group_id,
            None => latest_group(self.chain.as_ref()).await.map_err(|e| {
                stage(JoinStage::Rejected, None, commitment);
                e
            })?,
        };
        let rejected = |e: Error| {
            stage(JoinStage::Rejected, Some(group_id), commitment);
            tracing::warn!(%e, %group_id, "Join rejected");
            e
        };

        self.ensure_funded().await.map_err(rejected)?;
        // the Ombu group list and Semaphore must agree on the group
        self.chain.accumulator(group_id).await.map_err(rejected)?;
        match self.chain.is_member(group_id, commitment).await {
            Ok(true) => return Ok(self.already_member(group_id, commitment).await),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    %e,
                    %group_id,
                    "Could not check membership, sending the join anyway",
                );
            }
        }
        stage(JoinStage::PreconditionsChecked, Some(group_id), commitment);

        let tx_hash =
            match self.chain.submit_add_member(group_id, commitment).await {
                Ok(tx_hash) => tx_hash,
                Err(Error::ContractCallReverted { reason })
                    if reason.is_duplicate_member() =>
                {
                    tracing::info!(
                        %group_id,
                        %reason,
                        "Join raced with another insertion of the same commitment",
                    );
                    return Ok(self.already_member(group_id, commitment).await);
                }
                Err(e) => return Err(rejected(e)),
            };
        self.metrics.lock().await.joins_submitted.inc();
        stage(JoinStage::Submitted, Some(group_id), commitment);
        tracing::info!(tx = %self.link(tx_hash), %group_id, "addMember sent");

        let receipt = match self.confirm(tx_hash).await {
            Ok(receipt) => receipt,
            Err(Error::ContractCallReverted {
                reason: RevertReason::StatusFailed,
            }) => {
                // a concurrent join of the same commitment may have won
                if let Ok(true) =
                    self.chain.is_member(group_id, commitment).await
                {
                    tracing::info!(
                        tx = %self.link(tx_hash),
                        %group_id,
                        "addMember reverted, the commitment was inserted by another transaction",
                    );
                    return Ok(self.already_member(group_id, commitment).await);
                }
                return Err(rejected(Error::ContractCallReverted {
                    reason: RevertReason::StatusFailed,
                }));
            }
            Err(e) => return Err(e),
        };
        stage(JoinStage::Confirmed, Some(group_id), commitment);

        let recorded = match member_added_in_receipt(
            &receipt,
            self.chain.semaphore_address(),
            group_id,
            commitment,
        ) {
            Some(member) => {
                let accepted_at =
                    self.accepted_at(group_id, member.block_number).await;
                self.persist(MembershipRecord::from_chain(
                    group_id,
                    &member,
                    accepted_at,
                ))
                .await
            }
            None => {
                tracing::warn!(
                    tx = %self.link(tx_hash),
                    %group_id,
                    "No MemberAdded event in the receipt, membership not recorded",
                );
                false
            }
        };
        self.cache.add_if_present(group_id, commitment);
        stage(JoinStage::Recorded, Some(group_id), commitment);

        Ok(JoinOutcome::Joined {
            group_id,
            transaction_hash: tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            recorded,
        })
    }

    /// Short-circuits a join of an existing member, making sure the store
    /// knows about it.
    async fn already_member(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> JoinOutcome {
        self.metrics.lock().await.joins_already_member.inc();
        let backfilled = self.backfill(group_id, commitment).await;
        self.cache.add_if_present(group_id, commitment);
        tracing::info!(%group_id, backfilled, "Commitment is already a member");
        JoinOutcome::AlreadyMember {
            group_id,
            backfilled,
        }
    }

    /// Recovers a missing record from the chain log. Best effort.
    async fn backfill(&self, group_id: U256, commitment: U256) -> bool {
        match self.store.contains(group_id, commitment) {
            Ok(true) => return false,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%e, %group_id, "Skipping backfill, store unavailable");
                return false;
            }
        }
        match self.reader.find_member(group_id, commitment).await {
            Ok(Some(member)) => {
                let accepted_at =
                    self.accepted_at(group_id, member.block_number).await;
                self.persist(MembershipRecord::from_chain(
                    group_id,
                    &member,
                    accepted_at,
                ))
                .await
            }
            Ok(None) => {
                tracing::warn!(
                    %group_id,
                    %commitment,
                    "Member has no MemberAdded event in the scanned range",
                );
                false
            }
            Err(e) => {
                tracing::warn!(%e, %group_id, "Could not backfill the member");
                false
            }
        }
    }
}
