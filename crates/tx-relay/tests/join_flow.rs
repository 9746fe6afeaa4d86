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

use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;
use tokio::sync::Mutex;

use ombu_group_state::GroupStateAssembler;
use ombu_log_reader::{ChainLogReader, ScanPolicy};
use ombu_membership_chain::{MembershipChain, MockedMembershipChain};
use ombu_membership_tree::compute_root;
use ombu_relayer_store::{InMemoryStore, MembershipCache, MembershipStore};
use ombu_relayer_types::{MembershipRecord, MembershipSource};
use ombu_relayer_utils::metric::Metrics;
use ombu_relayer_utils::{Error, Result, RevertReason};
use ombu_tx_relay::{
    JoinOutcome, JoinRequest, MembershipCoordinator, VoteRequest,
};

struct BrokenStore;

impl MembershipStore for BrokenStore {
    fn append(&self, _: &MembershipRecord) -> Result<()> {
        Err(Error::StoreUnavailable {
            reason: "disk full".into(),
        })
    }

    fn list_by_group(&self, _: U256) -> Result<Vec<MembershipRecord>> {
        Ok(Vec::new())
    }

    fn list_all(&self) -> Result<Vec<MembershipRecord>> {
        Ok(Vec::new())
    }

    fn contains(&self, _: U256, _: U256) -> Result<bool> {
        Ok(false)
    }
}

struct Relayer {
    chain: Arc<MockedMembershipChain>,
    store: Arc<dyn MembershipStore>,
    cache: Arc<MembershipCache>,
    metrics: Arc<Mutex<Metrics>>,
    coordinator: MembershipCoordinator,
    assembler: GroupStateAssembler,
}

impl Relayer {
    fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::default()))
    }

    fn with_store(store: Arc<dyn MembershipStore>) -> Self {
        let chain = Arc::new(MockedMembershipChain::default());
        let cache = Arc::new(MembershipCache::in_memory(16));
        let metrics = Arc::new(Mutex::new(Metrics::new().unwrap()));
        let policy = ScanPolicy::builder()
            .retry_interval(Duration::from_millis(1))
            .build();
        let reader =
            ChainLogReader::new(chain.clone(), policy, metrics.clone());
        let coordinator = MembershipCoordinator::builder()
            .chain(chain.clone())
            .store(store.clone())
            .cache(cache.clone())
            .reader(reader.clone())
            .metrics(metrics.clone())
            .receipt_timeout(Duration::from_millis(200))
            .retry_interval(Duration::from_millis(1))
            .build();
        let assembler = GroupStateAssembler::new(
            chain.clone(),
            store.clone(),
            cache.clone(),
            reader,
            metrics.clone(),
        );
        Self {
            chain,
            store,
            cache,
            metrics,
            coordinator,
            assembler,
        }
    }

    async fn join(&self, group_id: Option<u64>, commitment: U256) -> Result<JoinOutcome> {
        self.coordinator
            .join(JoinRequest {
                identity_commitment: commitment.to_string(),
                group_id: group_id.map(U256::from),
            })
            .await
    }

    async fn counter(&self, read: impl Fn(&Metrics) -> f64) -> u64 {
        read(&*self.metrics.lock().await) as u64
    }
}

#[tokio::test]
async fn accepted_joins_assemble_in_insertion_order() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(1), "ombu");
    let commitments: Vec<U256> =
        (0..5u64).map(|i| U256::from(31337 + i * 7)).collect();
    for commitment in &commitments {
        let outcome = relayer.join(Some(1), *commitment).await.unwrap();
        assert!(matches!(
            outcome,
            JoinOutcome::Joined { recorded: true, .. }
        ));
    }

    let stored: Vec<U256> = relayer
        .store
        .list_by_group(U256::from(1))
        .unwrap()
        .into_iter()
        .map(|r| r.commitment)
        .collect();
    assert_eq!(stored, commitments);

    let snapshot = relayer.assembler.assemble(U256::from(1)).await.unwrap();
    assert_eq!(snapshot.source, MembershipSource::Database);
    assert_eq!(snapshot.ordered_commitments, commitments);
    assert_eq!(snapshot.root, compute_root(&commitments).unwrap());
    assert_eq!(relayer.counter(|m| m.joins_submitted.get()).await, 5);
}

#[tokio::test]
async fn records_carry_the_event_metadata() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(3), "meta");
    relayer.join(Some(3), U256::from(11)).await.unwrap();
    let outcome = relayer.join(Some(3), U256::from(12)).await.unwrap();

    let records = relayer.store.list_by_group(U256::from(3)).unwrap();
    let last = &records[1];
    assert_eq!(last.chain_index, Some(1));
    let on_chain = relayer.chain.accumulator(U256::from(3)).await.unwrap();
    assert_eq!(last.merkle_tree_root, Some(on_chain.root));
    match outcome {
        JoinOutcome::Joined {
            transaction_hash,
            block_number,
            ..
        } => {
            assert_eq!(last.transaction_hash, transaction_hash);
            assert_eq!(last.block_number, block_number);
            // block timestamps are in seconds, records in milliseconds
            let block = block_number.unwrap();
            let seconds = relayer.chain.block_timestamp(block).await.unwrap();
            assert_eq!(Some(last.accepted_at), seconds.map(|s| s * 1000));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn joining_twice_is_idempotent() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(2), "twice");
    let commitment = U256::from(777);

    let first = relayer.join(Some(2), commitment).await.unwrap();
    assert!(matches!(first, JoinOutcome::Joined { .. }));
    let second = relayer.join(Some(2), commitment).await.unwrap();
    assert_eq!(
        second,
        JoinOutcome::AlreadyMember {
            group_id: U256::from(2),
            backfilled: false,
        }
    );
    assert_eq!(relayer.store.list_by_group(U256::from(2)).unwrap().len(), 1);
    assert_eq!(relayer.chain.members(U256::from(2)), vec![commitment]);
    assert_eq!(relayer.counter(|m| m.joins_already_member.get()).await, 1);
}

#[tokio::test]
async fn existing_members_are_backfilled_into_the_store() {
    let relayer = Relayer::new();
    let group_id = U256::from(4);
    relayer.chain.create_group(group_id, "backfill");
    let commitment = U256::from(4242);
    // joined through another relayer, this store never saw it
    relayer.chain.add_member_directly(group_id, commitment).unwrap();
    assert!(!relayer.store.contains(group_id, commitment).unwrap());

    let outcome = relayer.join(Some(4), commitment).await.unwrap();
    assert_eq!(
        outcome,
        JoinOutcome::AlreadyMember {
            group_id,
            backfilled: true,
        }
    );
    let records = relayer.store.list_by_group(group_id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].commitment, commitment);
    assert_eq!(records[0].chain_index, Some(0));
}

#[tokio::test]
async fn duplicate_revert_is_an_already_member_outcome() {
    let relayer = Relayer::new();
    let group_id = U256::from(5);
    relayer.chain.create_group(group_id, "race");
    let commitment = U256::from(55);
    relayer.chain.add_member_directly(group_id, commitment).unwrap();
    // the membership check is down, so the join reaches the contract
    relayer.chain.fail_membership_checks(true);

    let outcome = relayer.join(Some(5), commitment).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::AlreadyMember { .. }));
    assert_eq!(relayer.chain.members(group_id), vec![commitment]);
}

#[tokio::test]
async fn reverted_join_of_a_raced_commitment_is_an_already_member_outcome() {
    let relayer = Relayer::new();
    let group_id = U256::from(16);
    relayer.chain.create_group(group_id, "contested");
    let commitment = U256::from(160);
    // both joins passed the membership check, the other one was mined first
    relayer.chain.race_next_join();

    let outcome = relayer.join(Some(16), commitment).await.unwrap();
    assert_eq!(
        outcome,
        JoinOutcome::AlreadyMember {
            group_id,
            backfilled: true,
        }
    );
    assert_eq!(relayer.chain.members(group_id), vec![commitment]);
    let records = relayer.store.list_by_group(group_id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chain_index, Some(0));
    let snapshot = relayer.assembler.assemble(group_id).await.unwrap();
    assert_eq!(snapshot.source, MembershipSource::Database);
}

#[tokio::test]
async fn missing_block_time_keeps_the_chain_order() {
    let relayer = Relayer::new();
    let group_id = U256::from(17);
    relayer.chain.create_group(group_id, "clockless");
    let commitments: Vec<U256> = (170..173u64).map(U256::from).collect();

    relayer.join(Some(17), commitments[0]).await.unwrap();
    relayer.chain.fail_block_timestamps(true);
    relayer.join(Some(17), commitments[1]).await.unwrap();
    relayer.chain.fail_block_timestamps(false);
    relayer.join(Some(17), commitments[2]).await.unwrap();

    let records = relayer.store.list_by_group(group_id).unwrap();
    let stored: Vec<U256> = records.iter().map(|r| r.commitment).collect();
    assert_eq!(stored, commitments);
    assert_eq!(records[1].accepted_at, records[0].accepted_at);
    assert!(records[2].accepted_at > records[1].accepted_at);

    let snapshot = relayer.assembler.assemble(group_id).await.unwrap();
    assert_eq!(snapshot.source, MembershipSource::Database);
    assert_eq!(snapshot.ordered_commitments, commitments);
}

#[tokio::test]
async fn failed_membership_check_does_not_block_the_join() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(6), "flaky");
    relayer.chain.fail_membership_checks(true);

    let outcome = relayer.join(Some(6), U256::from(66)).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::Joined { .. }));
}

#[tokio::test]
async fn missing_event_skips_the_store_but_updates_the_cache() {
    let relayer = Relayer::new();
    let group_id = U256::from(7);
    relayer.chain.create_group(group_id, "silent");
    relayer.join(Some(7), U256::from(70)).await.unwrap();
    relayer.cache.set(group_id, vec![U256::from(70)]);
    relayer.chain.omit_events(true);

    let outcome = relayer.join(Some(7), U256::from(71)).await.unwrap();
    assert!(matches!(
        outcome,
        JoinOutcome::Joined {
            recorded: false,
            ..
        }
    ));
    assert_eq!(relayer.store.list_by_group(group_id).unwrap().len(), 1);
    assert_eq!(
        relayer.cache.get(group_id),
        Some(vec![U256::from(70), U256::from(71)])
    );
    // the assembler notices the gap instead of serving a short list
    assert!(matches!(
        relayer.assembler.assemble(group_id).await,
        Err(Error::GroupStateInconsistent {
            expected_size: 2,
            actual_size: 1,
            ..
        })
    ));
}

#[tokio::test]
async fn cache_is_not_created_by_a_join() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(8), "uncached");
    relayer.join(Some(8), U256::from(80)).await.unwrap();
    assert!(relayer.cache.get(U256::from(8)).is_none());
}

#[tokio::test]
async fn store_failures_do_not_fail_the_join() {
    let relayer = Relayer::with_store(Arc::new(BrokenStore));
    relayer.chain.create_group(U256::from(9), "broken");

    let outcome = relayer.join(Some(9), U256::from(90)).await.unwrap();
    assert!(matches!(
        outcome,
        JoinOutcome::Joined {
            recorded: false,
            ..
        }
    ));
    assert_eq!(
        relayer
            .counter(|m| m.membership_store_write_failures.get())
            .await,
        1
    );
}

#[tokio::test]
async fn joins_default_to_the_latest_group() {
    let relayer = Relayer::new();
    assert!(matches!(
        relayer.join(None, U256::from(1)).await,
        Err(Error::NoGroups)
    ));

    relayer.chain.create_group(U256::from(10), "old");
    relayer.chain.create_group(U256::from(11), "new");
    let outcome = relayer.join(None, U256::from(1)).await.unwrap();
    assert_eq!(outcome.group_id(), U256::from(11));
    assert!(relayer.chain.members(U256::from(10)).is_empty());
}

#[tokio::test]
async fn explicit_group_must_exist_on_semaphore() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(12), "real");
    let result = relayer.join(Some(404), U256::from(1)).await;
    assert!(matches!(result, Err(Error::GroupNotFound { .. })));
}

#[tokio::test]
async fn unfunded_relayer_refuses_joins() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(13), "poor");
    relayer.chain.set_balance(U256::zero());

    let result = relayer.join(Some(13), U256::from(1)).await;
    assert!(matches!(result, Err(Error::InsufficientFunds)));
    assert!(relayer.chain.members(U256::from(13)).is_empty());
    assert_eq!(relayer.counter(|m| m.joins_submitted.get()).await, 0);
}

#[tokio::test]
async fn malformed_commitments_are_invalid_requests() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(14), "strict");
    for bad in ["", "  ", "0x", "12abc", "-5"] {
        let result = relayer
            .coordinator
            .join(JoinRequest {
                identity_commitment: bad.to_string(),
                group_id: Some(U256::from(14)),
            })
            .await;
        assert!(
            matches!(result, Err(Error::InvalidRequest(_))),
            "{bad:?} was accepted"
        );
    }
    let hex = relayer
        .coordinator
        .join(JoinRequest {
            identity_commitment: "0xff".to_string(),
            group_id: Some(U256::from(14)),
        })
        .await
        .unwrap();
    assert!(matches!(hex, JoinOutcome::Joined { .. }));
    assert_eq!(relayer.chain.members(U256::from(14)), vec![U256::from(255)]);
}

#[tokio::test]
async fn receipt_timeout_leaves_the_transaction_in_flight() {
    let relayer = Relayer::new();
    let group_id = U256::from(15);
    relayer.chain.create_group(group_id, "slow");
    relayer.chain.hold_receipts(true);

    let result = relayer.join(Some(15), U256::from(150)).await;
    assert!(matches!(result, Err(Error::ReceiptTimeout { .. })));
    assert!(result.unwrap_err().is_recoverable());
    // the transaction was not undone
    assert_eq!(relayer.chain.members(group_id), vec![U256::from(150)]);

    relayer.chain.hold_receipts(false);
    let outcome = relayer.join(Some(15), U256::from(150)).await.unwrap();
    assert_eq!(
        outcome,
        JoinOutcome::AlreadyMember {
            group_id,
            backfilled: true,
        }
    );
}

fn vote(group_id: u64, post_id: u64, commitment: U256) -> VoteRequest {
    VoteRequest {
        group_id: U256::from(group_id),
        post_id: U256::from(post_id),
        identity_commitment: commitment.to_string(),
        is_upvote: true,
    }
}

#[tokio::test]
async fn members_can_vote_once_per_post() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(20), "voters");
    relayer.chain.set_posts(U256::from(20), 2);
    let member = U256::from(2020);
    relayer.join(Some(20), member).await.unwrap();

    let outcome = relayer.coordinator.vote(vote(20, 1, member)).await.unwrap();
    assert!(outcome.block_number.is_some());
    assert!(outcome.gas_used.is_some());
    assert_eq!(relayer.chain.votes(), 1);

    let again = relayer.coordinator.vote(vote(20, 1, member)).await;
    assert!(matches!(
        again,
        Err(Error::ContractCallReverted {
            reason: RevertReason::AlreadyVoted
        })
    ));
    let missing = relayer.coordinator.vote(vote(20, 9, member)).await;
    assert!(matches!(
        missing,
        Err(Error::ContractCallReverted {
            reason: RevertReason::PostDoesNotExist
        })
    ));
    assert_eq!(relayer.counter(|m| m.votes_submitted.get()).await, 1);
}

#[tokio::test]
async fn non_members_cannot_vote() {
    let relayer = Relayer::new();
    relayer.chain.create_group(U256::from(21), "closed");
    relayer.chain.set_posts(U256::from(21), 1);

    let result = relayer
        .coordinator
        .vote(vote(21, 0, U256::from(1)))
        .await;
    assert!(matches!(result, Err(Error::NotGroupMember { .. })));
    assert_eq!(relayer.chain.votes(), 0);
}
