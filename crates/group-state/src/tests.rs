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

use ethers::types::{H256, U256};
use tokio::sync::Mutex;

use ombu_log_reader::{ChainLogReader, ScanPolicy};
use ombu_membership_chain::{MembershipChain, MockedMembershipChain};
use ombu_membership_tree::compute_root;
use ombu_relayer_store::{InMemoryStore, MembershipCache, MembershipStore};
use ombu_relayer_types::{MembershipRecord, MembershipSource};
use ombu_relayer_utils::metric::Metrics;
use ombu_relayer_utils::{Error, Result};

use crate::GroupStateAssembler;

/// A store whose backend is gone.
struct UnavailableStore;

impl MembershipStore for UnavailableStore {
    fn append(&self, _: &MembershipRecord) -> Result<()> {
        Err(unavailable())
    }

    fn list_by_group(&self, _: U256) -> Result<Vec<MembershipRecord>> {
        Err(unavailable())
    }

    fn list_all(&self) -> Result<Vec<MembershipRecord>> {
        Err(unavailable())
    }

    fn contains(&self, _: U256, _: U256) -> Result<bool> {
        Err(unavailable())
    }
}

fn unavailable() -> Error {
    Error::StoreUnavailable {
        reason: "connection refused".into(),
    }
}

struct Harness {
    chain: Arc<MockedMembershipChain>,
    store: Arc<dyn MembershipStore>,
    cache: Arc<MembershipCache>,
    metrics: Arc<Mutex<Metrics>>,
    assembler: GroupStateAssembler,
}

impl Harness {
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
            assembler,
        }
    }

    /// Creates a group with `count` members, all joined on chain.
    fn group_with_members(&self, group_id: U256, count: u64) -> Vec<U256> {
        self.chain.create_group(group_id, "test group");
        for i in 0..count {
            let commitment = U256::from(0xc0ffee_u64 + i);
            self.chain.add_member_directly(group_id, commitment).unwrap();
        }
        self.chain.members(group_id)
    }

    fn store_members(&self, group_id: U256, members: &[U256]) {
        for (i, commitment) in members.iter().enumerate() {
            let record = MembershipRecord {
                group_id,
                commitment: *commitment,
                transaction_hash: H256::from_low_u64_be(i as u64 + 1),
                block_number: None,
                chain_index: Some(i as u64),
                merkle_tree_root: None,
                accepted_at: 1_700_000_000_000 + i as u64,
            };
            self.store.append(&record).unwrap();
        }
    }
}

#[tokio::test]
async fn stored_members_reproducing_the_root_are_served() {
    let harness = Harness::new();
    let group_id = U256::from(1);
    let members = harness.group_with_members(group_id, 5);
    harness.store_members(group_id, &members);

    let snapshot = harness.assembler.assemble(group_id).await.unwrap();
    let on_chain = harness.chain.accumulator(group_id).await.unwrap();
    assert_eq!(snapshot.ordered_commitments, members);
    assert_eq!(snapshot.root, on_chain.root);
    assert_eq!(snapshot.root, compute_root(&members).unwrap());
    assert_eq!(snapshot.size, 5);
    assert_eq!(snapshot.depth, 3);
    assert_eq!(snapshot.source, MembershipSource::Database);
    // the validated list becomes the cache entry
    assert_eq!(harness.cache.get(group_id), Some(members));
    assert_eq!(harness.chain.log_queries(), 0);
}

#[tokio::test]
async fn a_missing_stored_member_is_reported_as_inconsistent() {
    let harness = Harness::new();
    let group_id = U256::from(2);
    let members = harness.group_with_members(group_id, 5);
    harness.store_members(group_id, &members[..4]);
    let on_chain = harness.chain.accumulator(group_id).await.unwrap();

    let result = harness.assembler.assemble(group_id).await;
    match result {
        Err(Error::GroupStateInconsistent {
            group_id: g,
            expected,
            actual,
            expected_size,
            actual_size,
            origin,
        }) => {
            assert_eq!(g, group_id);
            assert_eq!(expected, on_chain.root);
            assert_eq!(actual, compute_root(&members[..4]).unwrap());
            assert_ne!(expected, actual);
            assert_eq!(expected_size, 5);
            assert_eq!(actual_size, 4);
            assert_eq!(origin, MembershipSource::Database);
        }
        other => panic!("expected an inconsistency, got {other:?}"),
    }
    // no silent fall through to the chain log
    assert_eq!(harness.chain.log_queries(), 0);
    assert!(harness.cache.get(group_id).is_none());
    assert_eq!(
        harness.metrics.lock().await.group_state_inconsistent.get() as u64,
        1
    );
}

#[tokio::test]
async fn reordered_members_are_rejected() {
    let harness = Harness::new();
    let group_id = U256::from(3);
    let mut members = harness.group_with_members(group_id, 3);
    members.swap(0, 2);
    harness.store_members(group_id, &members);

    let result = harness.assembler.assemble(group_id).await;
    assert!(matches!(
        result,
        Err(Error::GroupStateInconsistent {
            expected_size: 3,
            actual_size: 3,
            ..
        })
    ));
}

#[tokio::test]
async fn empty_store_falls_back_to_the_cache() {
    let harness = Harness::new();
    let group_id = U256::from(4);
    let members = harness.group_with_members(group_id, 3);
    harness.cache.set(group_id, members.clone());

    let snapshot = harness.assembler.assemble(group_id).await.unwrap();
    assert_eq!(snapshot.source, MembershipSource::Cache);
    assert_eq!(snapshot.ordered_commitments, members);
    assert_eq!(harness.chain.log_queries(), 0);
}

#[tokio::test]
async fn stale_cache_entries_do_not_pass_validation() {
    let harness = Harness::new();
    let group_id = U256::from(5);
    let members = harness.group_with_members(group_id, 3);
    harness.cache.set(group_id, members[..2].to_vec());

    let result = harness.assembler.assemble(group_id).await;
    assert!(matches!(
        result,
        Err(Error::GroupStateInconsistent {
            origin: MembershipSource::Cache,
            ..
        })
    ));
}

#[tokio::test]
async fn empty_sources_fall_back_to_the_chain_log() {
    let harness = Harness::new();
    let group_id = U256::from(6);
    let members = harness.group_with_members(group_id, 7);

    let snapshot = harness.assembler.assemble(group_id).await.unwrap();
    assert_eq!(snapshot.source, MembershipSource::Blockchain);
    assert_eq!(snapshot.ordered_commitments, members);
    assert!(harness.chain.log_queries() > 0);
    assert_eq!(harness.cache.get(group_id), Some(members));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn unavailable_store_falls_back_to_the_cache() {
    let harness = Harness::with_store(Arc::new(UnavailableStore));
    let group_id = U256::from(7);
    let members = harness.group_with_members(group_id, 2);
    harness.cache.set(group_id, members.clone());

    let snapshot = harness.assembler.assemble(group_id).await.unwrap();
    assert_eq!(snapshot.source, MembershipSource::Cache);
    assert!(logs_contain("Membership store unavailable"));
}

#[tokio::test]
async fn empty_groups_are_not_scanned() {
    let harness = Harness::new();
    let group_id = U256::from(8);
    harness.group_with_members(group_id, 0);

    let snapshot = harness.assembler.assemble(group_id).await.unwrap();
    assert!(snapshot.ordered_commitments.is_empty());
    assert_eq!(snapshot.root, U256::zero());
    assert_eq!(snapshot.size, 0);
    assert_eq!(harness.chain.log_queries(), 0);
}

#[tokio::test]
async fn unknown_groups_are_not_found() {
    let harness = Harness::new();
    let result = harness.assembler.assemble(U256::from(404)).await;
    assert!(matches!(result, Err(Error::GroupNotFound { .. })));
}

#[tokio::test]
async fn snapshot_serializes_field_elements_as_strings() {
    let harness = Harness::new();
    let group_id = U256::from(9);
    let members = harness.group_with_members(group_id, 1);

    let snapshot = harness.assembler.assemble(group_id).await.unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["groupId"], 9);
    assert_eq!(json["size"], "1");
    assert_eq!(json["depth"], "0");
    assert_eq!(json["members"][0], members[0].to_string());
    // a single leaf is the root
    assert_eq!(json["root"], members[0].to_string());
}

#[tokio::test]
async fn membership_is_answered_by_the_store_first() {
    let harness = Harness::new();
    let group_id = U256::from(10);
    let members = harness.group_with_members(group_id, 2);
    harness.store_members(group_id, &members[..1]);

    let (is_member, source) = harness
        .assembler
        .is_member(group_id, members[0])
        .await
        .unwrap();
    assert!(is_member);
    assert_eq!(source, MembershipSource::Database);

    let (is_member, source) = harness
        .assembler
        .is_member(group_id, members[1])
        .await
        .unwrap();
    assert!(is_member);
    assert_eq!(source, MembershipSource::Blockchain);

    let (is_member, source) = harness
        .assembler
        .is_member(group_id, U256::from(1))
        .await
        .unwrap();
    assert!(!is_member);
    assert_eq!(source, MembershipSource::Blockchain);
}

#[tokio::test]
async fn membership_check_survives_an_unavailable_store() {
    let harness = Harness::with_store(Arc::new(UnavailableStore));
    let group_id = U256::from(11);
    let members = harness.group_with_members(group_id, 1);

    let (is_member, source) = harness
        .assembler
        .is_member(group_id, members[0])
        .await
        .unwrap();
    assert!(is_member);
    assert_eq!(source, MembershipSource::Blockchain);
}

#[tokio::test]
async fn groups_are_listed_in_creation_order() {
    let harness = Harness::new();
    assert!(matches!(
        harness.assembler.latest_group().await,
        Err(Error::NoGroups)
    ));

    harness.chain.create_group(U256::from(42), "first");
    harness.chain.create_group(U256::from(7), "second");
    // semaphore only groups are not listed
    harness.chain.create_semaphore_group(U256::from(99), "hidden");

    let list = harness.assembler.list_groups().await.unwrap();
    assert_eq!(list.total_groups, 2);
    assert_eq!(list.groups[0].group_id, U256::from(42));
    assert_eq!(list.groups[1].name, "second");
    assert_eq!(harness.assembler.latest_group().await.unwrap(), U256::from(7));

    let json = serde_json::to_value(&list).unwrap();
    assert_eq!(json["totalGroups"], 2);
    assert_eq!(json["groups"][0]["groupId"], "42");
}
