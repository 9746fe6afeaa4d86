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

use ethers::types::{H256, U256};
use serde::Deserialize;

use ombu_membership_chain::VoteCall;
use ombu_relayer_types::serde_decimal;
use ombu_relayer_utils::{probe, Error, Result};

use super::{parse_commitment, MembershipCoordinator};

/// Body of `POST /vote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// The group the post belongs to.
    #[serde(with = "serde_decimal")]
    pub group_id: U256,
    /// The voted post.
    #[serde(with = "serde_decimal")]
    pub post_id: U256,
    /// The voter identity commitment.
    #[serde(default)]
    pub identity_commitment: String,
    /// Upvote or downvote.
    pub is_upvote: bool,
}

/// A mined vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// The `voteOnPost` transaction.
    pub transaction_hash: H256,
    /// Block the transaction was mined in.
    pub block_number: Option<u64>,
    /// Gas paid by the relayer.
    pub gas_used: Option<U256>,
}

impl MembershipCoordinator {
    /// Relays a vote of a group member.
    ///
    /// Fails with [`Error::NotGroupMember`] unless the Ombu contract knows
    /// the commitment as a member of the group.
    #[tracing::instrument(skip_all, fields(group_id = %request.group_id, post_id = %request.post_id))]
    pub async fn vote(&self, request: VoteRequest) -> Result<VoteOutcome> {
        let commitment = parse_commitment(&request.identity_commitment)?;
        self.ensure_funded().await?;
        if !self.chain.is_member(request.group_id, commitment).await? {
            return Err(Error::NotGroupMember {
                group_id: request.group_id,
            });
        }

        let call = VoteCall {
            group_id: request.group_id,
            post_id: request.post_id,
            is_upvote: request.is_upvote,
            commitment,
        };
        let tx_hash = self.chain.submit_vote(call).await.map_err(|e| {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Vote,
                group_id = %request.group_id,
                post_id = %request.post_id,
                errored = true,
                error = %e,
            );
            e
        })?;
        self.metrics.lock().await.votes_submitted.inc();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Vote,
            group_id = %request.group_id,
            post_id = %request.post_id,
            pending = true,
            %tx_hash,
        );

        let receipt = self.confirm(tx_hash).await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Vote,
            group_id = %request.group_id,
            post_id = %request.post_id,
            finalized = true,
            tx = %self.link(tx_hash),
        );
        Ok(VoteOutcome {
            transaction_hash: tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used,
        })
    }
}
