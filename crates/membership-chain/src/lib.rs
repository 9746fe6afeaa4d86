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
//! # Membership Chain 🔗
//!
//! Everything the relayer reads from or writes to the Semaphore and Ombu
//! contracts goes through the [`MembershipChain`] trait, so the membership
//! core can run against a real node ([`EthersMembershipChain`]) or a
//! deterministic in-process chain ([`MockedMembershipChain`]).

use ethers::contract::{parse_log, EthEvent};
use ethers::types::{Address, Log, TransactionReceipt, H256, U256};

use ombu_relayer_types::{AccumulatorState, ChainMemberRecord};
use ombu_relayer_utils::{Error, Result};

/// Contract bindings.
pub mod contracts;
/// The ethers-backed chain client.
pub mod ethers_chain;
/// A deterministic in-process chain.
pub mod mocked;

pub use contracts::MemberAddedFilter;
pub use ethers_chain::{EthersClient, EthersMembershipChain, SignerClient};
pub use mocked::MockedMembershipChain;

/// A `eth_getLogs` query for one indexed group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// The emitting contract.
    pub address: Address,
    /// The event signature (topic 0).
    pub signature: H256,
    /// The indexed group id (topic 1).
    pub group_id: U256,
    /// First block, inclusive.
    pub from_block: u64,
    /// Last block, inclusive.
    pub to_block: u64,
}

impl LogQuery {
    /// Number of blocks covered by the query.
    pub fn width(&self) -> u64 {
        self.to_block.saturating_sub(self.from_block) + 1
    }
}

/// A `voteOnPost` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteCall {
    /// The group the post belongs to.
    pub group_id: U256,
    /// The voted post.
    pub post_id: U256,
    /// Upvote or downvote.
    pub is_upvote: bool,
    /// The voter identity commitment.
    pub commitment: U256,
}

/// The chain, as seen by the membership core.
#[async_trait::async_trait]
pub trait MembershipChain: Send + Sync {
    /// Address of the Semaphore contract.
    fn semaphore_address(&self) -> Address;
    /// Address of the Ombu contract.
    fn ombu_address(&self) -> Address;
    /// The latest block number.
    async fn latest_block_number(&self) -> Result<u64>;
    /// Timestamp (unix seconds) of a block, `None` if the block is unknown.
    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>>;
    /// Balance of the relayer signing account, in wei.
    async fn relayer_balance(&self) -> Result<U256>;
    /// Ombu `groupCounter()`.
    async fn group_counter(&self) -> Result<U256>;
    /// Ombu `groups(index)`: the Semaphore group id of the `index`th group.
    async fn group_at(&self, index: U256) -> Result<U256>;
    /// Ombu `groupNames(groupId)`.
    async fn group_name(&self, group_id: U256) -> Result<String>;
    /// Semaphore root, depth and size of a group.
    ///
    /// Fails with [`Error::GroupNotFound`] when the group does not exist.
    async fn accumulator(&self, group_id: U256) -> Result<AccumulatorState>;
    /// Ombu `isGroupMember(groupId, commitment)`.
    async fn is_member(&self, group_id: U256, commitment: U256) -> Result<bool>;
    /// Raw logs matching the query.
    ///
    /// Fails with [`Error::RangeTooLarge`] when the node refuses the range.
    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>>;
    /// Sends Ombu `addMember(groupId, commitment)`, returns the tx hash.
    async fn submit_add_member(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> Result<H256>;
    /// Sends Ombu `voteOnPost(...)`, returns the tx hash.
    async fn submit_vote(&self, vote: VoteCall) -> Result<H256>;
    /// Waits until the transaction is mined.
    ///
    /// Resolves to `None` when the transaction was dropped. Never returns on
    /// its own while the transaction is pending, callers bound it with a
    /// timeout.
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>>;
}

/// `groups(groupCounter - 1)`: the most recently created Ombu group.
///
/// Fails with [`Error::NoGroups`] when the contract has none.
pub async fn latest_group(chain: &dyn MembershipChain) -> Result<U256> {
    let counter = chain.group_counter().await?;
    if counter.is_zero() {
        return Err(Error::NoGroups);
    }
    chain.group_at(counter - 1).await
}

/// Topic 0 of `MemberAdded`.
pub fn member_added_signature() -> H256 {
    MemberAddedFilter::signature()
}

/// Decodes a `MemberAdded` log, including its position metadata.
pub fn decode_member_added(log: &Log) -> Result<ChainMemberRecord> {
    let event: MemberAddedFilter =
        parse_log(log.clone()).map_err(|e| Error::Decode {
            reason: e.to_string(),
        })?;
    let group_id = log
        .topics
        .get(1)
        .map(|topic| U256::from_big_endian(topic.as_bytes()))
        .ok_or_else(|| Error::Decode {
            reason: "MemberAdded log without an indexed group id".into(),
        })?;
    let block_number = log.block_number.ok_or_else(|| Error::Decode {
        reason: "MemberAdded log from a pending block".into(),
    })?;
    let chain_index =
        u64::try_from(event.index).map_err(|_| Error::Decode {
            reason: format!("leaf index {} does not fit in u64", event.index),
        })?;
    Ok(ChainMemberRecord {
        group_id,
        chain_index,
        commitment: event.identity_commitment,
        merkle_tree_root: Some(event.merkle_tree_root),
        block_number: block_number.as_u64(),
        transaction_index: log
            .transaction_index
            .map(|i| i.as_u64())
            .unwrap_or_default(),
        log_index: log
            .log_index
            .map(|i| i.low_u64())
            .unwrap_or_default(),
        transaction_hash: log.transaction_hash.unwrap_or_default(),
    })
}

/// The `MemberAdded` event of `group_id` in a receipt, emitted by `semaphore`.
pub fn member_added_in_receipt(
    receipt: &TransactionReceipt,
    semaphore: Address,
    group_id: U256,
    commitment: U256,
) -> Option<ChainMemberRecord> {
    let signature = member_added_signature();
    receipt
        .logs
        .iter()
        .filter(|log| log.address == semaphore)
        .filter(|log| log.topics.first() == Some(&signature))
        .filter_map(|log| {
            // receipt logs may lack metadata, fill it from the receipt
            let mut log = log.clone();
            log.block_number = log.block_number.or(receipt.block_number);
            log.transaction_hash =
                log.transaction_hash.or(Some(receipt.transaction_hash));
            match decode_member_added(&log) {
                Ok(member) => Some(member),
                Err(e) => {
                    tracing::warn!(%e, "Skipping malformed MemberAdded log");
                    None
                }
            }
        })
        .find(|member| {
            member.group_id == group_id && member.commitment == commitment
        })
}
