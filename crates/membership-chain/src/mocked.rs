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

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use ethers::abi::{self, Token};
use ethers::types::{Address, BigEndianHash, Log, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use parking_lot::Mutex;
use typed_builder::TypedBuilder;

use ombu_membership_tree::{LeanIMT, PoseidonHasher};
use ombu_relayer_types::AccumulatorState;
use ombu_relayer_utils::{Error, Result, RevertReason};

use crate::{member_added_signature, LogQuery, MembershipChain, VoteCall};

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

struct MockGroup {
    name: String,
    tree: LeanIMT<PoseidonHasher>,
    posts: u64,
}

struct MockState {
    block: u64,
    nonce: u64,
    balance: U256,
    ombu_groups: Vec<U256>,
    groups: HashMap<U256, MockGroup>,
    logs: Vec<Log>,
    receipts: HashMap<H256, TransactionReceipt>,
    votes: HashSet<(U256, U256, U256)>,
    max_log_range: Option<u64>,
    failing_log_queries: usize,
    log_queries: usize,
    omit_events: bool,
    hold_receipts: bool,
    fail_membership_checks: bool,
    fail_block_timestamps: bool,
    race_next_join: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            block: 1,
            nonce: 0,
            balance: U256::exp10(18),
            ombu_groups: Vec::new(),
            groups: HashMap::new(),
            logs: Vec::new(),
            receipts: HashMap::new(),
            votes: HashSet::new(),
            max_log_range: None,
            failing_log_queries: 0,
            log_queries: 0,
            omit_events: false,
            hold_receipts: false,
            fail_membership_checks: false,
            fail_block_timestamps: false,
            race_next_join: false,
        }
    }
}

impl MockState {
    fn group(&self, group_id: U256) -> Result<&MockGroup> {
        self.groups
            .get(&group_id)
            .ok_or(Error::GroupNotFound { group_id })
    }

    /// Mines one transaction in its own block.
    fn mine(
        &mut self,
        semaphore: Address,
        member_added: Option<(U256, U256)>,
    ) -> Result<(H256, Option<Log>)> {
        self.nonce += 1;
        self.block += 1;
        let tx_hash = H256::from(keccak256(self.nonce.to_be_bytes()));
        let log = match member_added {
            Some((group_id, commitment)) => {
                let group = self
                    .groups
                    .get_mut(&group_id)
                    .ok_or(Error::GroupNotFound { group_id })?;
                let index = group.tree.size();
                group.tree.insert(commitment)?;
                let root = group.tree.root_or_zero();
                let log = Log {
                    address: semaphore,
                    topics: vec![
                        member_added_signature(),
                        H256::from_uint(&group_id),
                    ],
                    data: abi::encode(&[
                        Token::Uint(U256::from(index)),
                        Token::Uint(commitment),
                        Token::Uint(root),
                    ])
                    .into(),
                    block_number: Some(U64::from(self.block)),
                    transaction_hash: Some(tx_hash),
                    transaction_index: Some(U64::zero()),
                    log_index: Some(U256::zero()),
                    ..Default::default()
                };
                self.logs.push(log.clone());
                Some(log)
            }
            None => None,
        };
        Ok((tx_hash, log))
    }

    fn record_receipt(
        &mut self,
        tx_hash: H256,
        log: Option<Log>,
        succeeded: bool,
    ) {
        let logs = match log {
            Some(log) if !self.omit_events => vec![log],
            _ => Vec::new(),
        };
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(self.block)),
            status: Some(if succeeded { U64::one() } else { U64::zero() }),
            gas_used: Some(U256::from(87_000u64)),
            logs,
            ..Default::default()
        };
        self.receipts.insert(tx_hash, receipt);
    }
}

/// An in-process chain with a Semaphore and an Ombu contract.
///
/// Every transaction is mined in its own block. Groups keep a real
/// Poseidon Lean IMT, so roots behave like on chain.
#[derive(TypedBuilder)]
pub struct MockedMembershipChain {
    #[builder(default = Address::repeat_byte(0x5e))]
    semaphore: Address,
    #[builder(default = Address::repeat_byte(0x0b))]
    ombu: Address,
    #[builder(default, setter(skip))]
    state: Mutex<MockState>,
}

impl Default for MockedMembershipChain {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockedMembershipChain {
    /// Creates a group on Semaphore and registers it on Ombu.
    pub fn create_group(&self, group_id: U256, name: &str) {
        self.create_semaphore_group(group_id, name);
        self.state.lock().ombu_groups.push(group_id);
    }

    /// Creates a group on Semaphore only.
    pub fn create_semaphore_group(&self, group_id: U256, name: &str) {
        let mut state = self.state.lock();
        state.groups.entry(group_id).or_insert_with(|| MockGroup {
            name: name.to_string(),
            tree: LeanIMT::new(PoseidonHasher),
            posts: 0,
        });
        state.block += 1;
    }

    /// Inserts a member as if another party sent the transaction.
    pub fn add_member_directly(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> Result<H256> {
        let mut state = self.state.lock();
        let (tx_hash, log) = state.mine(self.semaphore, Some((group_id, commitment)))?;
        state.record_receipt(tx_hash, log, true);
        Ok(tx_hash)
    }

    /// Emits a `MemberAdded` log with an arbitrary payload in a new block,
    /// without touching the group tree.
    pub fn emit_raw_member_added(&self, group_id: U256, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.block += 1;
        let log = Log {
            address: self.semaphore,
            topics: vec![member_added_signature(), H256::from_uint(&group_id)],
            data: data.into(),
            block_number: Some(U64::from(state.block)),
            transaction_hash: Some(H256::repeat_byte(0xee)),
            transaction_index: Some(U64::zero()),
            log_index: Some(U256::zero()),
            ..Default::default()
        };
        state.logs.push(log);
    }

    /// Members of a group, in insertion order.
    pub fn members(&self, group_id: U256) -> Vec<U256> {
        self.state
            .lock()
            .groups
            .get(&group_id)
            .map(|g| g.tree.leaves().to_vec())
            .unwrap_or_default()
    }

    /// Sets the number of posts of a group.
    pub fn set_posts(&self, group_id: U256, posts: u64) {
        if let Some(group) = self.state.lock().groups.get_mut(&group_id) {
            group.posts = posts;
        }
    }

    /// Sets the relayer balance.
    pub fn set_balance(&self, balance: U256) {
        self.state.lock().balance = balance;
    }

    /// Refuses log queries covering more than `blocks` blocks.
    pub fn set_max_log_range(&self, blocks: Option<u64>) {
        self.state.lock().max_log_range = blocks;
    }

    /// Fails the next `count` log queries with a transient error.
    pub fn fail_next_log_queries(&self, count: usize) {
        self.state.lock().failing_log_queries = count;
    }

    /// Leaves `MemberAdded` out of the receipts of future transactions.
    pub fn omit_events(&self, omit: bool) {
        self.state.lock().omit_events = omit;
    }

    /// Holds every receipt back until released.
    pub fn hold_receipts(&self, hold: bool) {
        self.state.lock().hold_receipts = hold;
    }

    /// Makes `isGroupMember` time out.
    pub fn fail_membership_checks(&self, fail: bool) {
        self.state.lock().fail_membership_checks = fail;
    }

    /// Makes block timestamp lookups fail.
    pub fn fail_block_timestamps(&self, fail: bool) {
        self.state.lock().fail_block_timestamps = fail;
    }

    /// Lets another transaction insert the commitment of the next
    /// `addMember` first, so the relayer transaction is mined with a failed
    /// status.
    pub fn race_next_join(&self) {
        self.state.lock().race_next_join = true;
    }

    /// Mines `count` empty blocks.
    pub fn advance_blocks(&self, count: u64) {
        self.state.lock().block += count;
    }

    /// Number of `eth_getLogs` queries served or refused so far.
    pub fn log_queries(&self) -> usize {
        self.state.lock().log_queries
    }

    /// Number of votes cast.
    pub fn votes(&self) -> usize {
        self.state.lock().votes.len()
    }
}

#[async_trait::async_trait]
impl MembershipChain for MockedMembershipChain {
    fn semaphore_address(&self) -> Address {
        self.semaphore
    }

    fn ombu_address(&self) -> Address {
        self.ombu
    }

    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.state.lock().block)
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>> {
        let state = self.state.lock();
        if state.fail_block_timestamps {
            return Err(Error::ChainTimeout(
                "eth_getBlockByNumber timed out".into(),
            ));
        }
        Ok((block <= state.block).then(|| GENESIS_TIMESTAMP + block * 2))
    }

    async fn relayer_balance(&self) -> Result<U256> {
        Ok(self.state.lock().balance)
    }

    async fn group_counter(&self) -> Result<U256> {
        Ok(U256::from(self.state.lock().ombu_groups.len()))
    }

    async fn group_at(&self, index: U256) -> Result<U256> {
        let state = self.state.lock();
        if index >= U256::from(state.ombu_groups.len()) {
            // out of bounds array access panics in solidity
            return Err(Error::ContractCallReverted {
                reason: RevertReason::Unknown(Vec::new()),
            });
        }
        Ok(state.ombu_groups[index.low_u64() as usize])
    }

    async fn group_name(&self, group_id: U256) -> Result<String> {
        let state = self.state.lock();
        Ok(state
            .groups
            .get(&group_id)
            .map(|g| g.name.clone())
            .unwrap_or_default())
    }

    async fn accumulator(&self, group_id: U256) -> Result<AccumulatorState> {
        let state = self.state.lock();
        let group = state.group(group_id)?;
        Ok(AccumulatorState {
            root: group.tree.root_or_zero(),
            depth: group.tree.depth() as u64,
            size: group.tree.size() as u64,
        })
    }

    async fn is_member(&self, group_id: U256, commitment: U256) -> Result<bool> {
        let state = self.state.lock();
        if state.fail_membership_checks {
            return Err(Error::ChainTimeout("isGroupMember timed out".into()));
        }
        Ok(state
            .groups
            .get(&group_id)
            .map(|g| g.tree.index_of(&commitment).is_some())
            .unwrap_or(false))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        let mut state = self.state.lock();
        state.log_queries += 1;
        if state.failing_log_queries > 0 {
            state.failing_log_queries -= 1;
            return Err(Error::ContractCall("connection reset by peer".into()));
        }
        if let Some(max) = state.max_log_range {
            if query.width() > max {
                return Err(Error::RangeTooLarge {
                    from: query.from_block,
                    to: query.to_block + 1,
                });
            }
        }
        let group_topic = H256::from_uint(&query.group_id);
        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == query.address)
            .filter(|log| log.topics.first() == Some(&query.signature))
            .filter(|log| log.topics.get(1) == Some(&group_topic))
            .filter(|log| {
                let block = log.block_number.unwrap_or_default().as_u64();
                (query.from_block..=query.to_block).contains(&block)
            })
            .cloned()
            .collect())
    }

    async fn submit_add_member(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> Result<H256> {
        let mut state = self.state.lock();
        if state.balance.is_zero() {
            return Err(Error::InsufficientFunds);
        }
        if state.group(group_id)?.tree.index_of(&commitment).is_some() {
            return Err(Error::ContractCallReverted {
                reason: RevertReason::MemberAlreadyExists,
            });
        }
        if std::mem::take(&mut state.race_next_join) {
            let (competitor, log) =
                state.mine(self.semaphore, Some((group_id, commitment)))?;
            state.record_receipt(competitor, log, true);
            let (tx_hash, _) = state.mine(self.semaphore, None)?;
            state.record_receipt(tx_hash, None, false);
            return Ok(tx_hash);
        }
        let (tx_hash, log) = state.mine(self.semaphore, Some((group_id, commitment)))?;
        state.record_receipt(tx_hash, log, true);
        Ok(tx_hash)
    }

    async fn submit_vote(&self, vote: VoteCall) -> Result<H256> {
        let mut state = self.state.lock();
        if state.balance.is_zero() {
            return Err(Error::InsufficientFunds);
        }
        let group = state.group(vote.group_id)?;
        let revert = |reason| Err(Error::ContractCallReverted { reason });
        if group.tree.index_of(&vote.commitment).is_none() {
            return revert(RevertReason::UserNotGroupMember);
        }
        if vote.post_id >= U256::from(group.posts) {
            return revert(RevertReason::PostDoesNotExist);
        }
        if !state
            .votes
            .insert((vote.group_id, vote.post_id, vote.commitment))
        {
            return revert(RevertReason::AlreadyVoted);
        }
        let (tx_hash, _) = state.mine(self.semaphore, None)?;
        state.record_receipt(tx_hash, None, true);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>> {
        loop {
            {
                let state = self.state.lock();
                if !state.hold_receipts {
                    return Ok(state.receipts.get(&tx_hash).cloned());
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ombu_membership_tree::compute_root;

    #[tokio::test]
    async fn roots_follow_insertions() {
        let chain = MockedMembershipChain::default();
        let group = U256::from(7);
        chain.create_group(group, "ombu");
        for c in 1u64..=3 {
            let tx = chain.submit_add_member(group, c.into()).await.unwrap();
            let receipt = chain.wait_for_receipt(tx).await.unwrap().unwrap();
            assert_eq!(receipt.logs.len(), 1);
        }
        let state = chain.accumulator(group).await.unwrap();
        assert_eq!(state.size, 3);
        assert_eq!(state.depth, 2);
        assert_eq!(
            state.root,
            compute_root(&[1.into(), 2.into(), 3.into()]).unwrap()
        );
    }

    #[tokio::test]
    async fn duplicates_and_missing_groups_revert() {
        let chain = MockedMembershipChain::default();
        let group = U256::from(1);
        chain.create_group(group, "g");
        chain.submit_add_member(group, 5.into()).await.unwrap();
        let err = chain.submit_add_member(group, 5.into()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ContractCallReverted { ref reason } if reason.is_duplicate_member()
        ));
        let err = chain.submit_add_member(2.into(), 5.into()).await.unwrap_err();
        assert!(matches!(err, Error::GroupNotFound { .. }));
    }

    #[tokio::test]
    async fn raced_joins_mine_a_failed_transaction() {
        let chain = MockedMembershipChain::default();
        let group = U256::from(3);
        chain.create_group(group, "raced");
        chain.race_next_join();
        let tx = chain.submit_add_member(group, 9.into()).await.unwrap();
        let receipt = chain.wait_for_receipt(tx).await.unwrap().unwrap();
        assert_eq!(receipt.status, Some(U64::zero()));
        assert!(receipt.logs.is_empty());
        assert_eq!(chain.members(group), vec![U256::from(9)]);
        // only the next join races
        let tx = chain.submit_add_member(group, 10.into()).await.unwrap();
        let receipt = chain.wait_for_receipt(tx).await.unwrap().unwrap();
        assert_eq!(receipt.status, Some(U64::one()));
    }

    #[tokio::test]
    async fn log_range_limit_is_enforced() {
        let chain = MockedMembershipChain::default();
        chain.set_max_log_range(Some(10));
        let query = LogQuery {
            address: chain.semaphore_address(),
            signature: member_added_signature(),
            group_id: 1.into(),
            from_block: 0,
            to_block: 10,
        };
        assert!(matches!(
            chain.logs(&query).await,
            Err(Error::RangeTooLarge { from: 0, to: 11 })
        ));
        let query = LogQuery { to_block: 9, ..query };
        assert!(chain.logs(&query).await.unwrap().is_empty());
        assert_eq!(chain.log_queries(), 2);
    }
}
