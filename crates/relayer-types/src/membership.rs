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

//! The membership data model shared by the store, the assembler and the
//! mutation coordinator.

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};

use ombu_relayer_utils::MembershipSource;

use crate::serde_decimal;

/// One accepted join, persisted once the join transaction is confirmed.
///
/// Records are never mutated or deleted. The order of the records of a
/// group is the order of `accepted_at`, which is also the insertion order of
/// the on-chain tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    /// The on-chain group identifier.
    #[serde(with = "serde_decimal")]
    pub group_id: U256,
    /// The identity commitment, unique within a group.
    #[serde(with = "serde_decimal")]
    pub commitment: U256,
    /// The transaction that inserted the commitment.
    pub transaction_hash: H256,
    /// Block of the confirming transaction, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// The leaf position emitted by `MemberAdded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_index: Option<u64>,
    /// The tree root right after this insertion, as emitted by `MemberAdded`.
    #[serde(
        default,
        with = "serde_decimal::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub merkle_tree_root: Option<U256>,
    /// Acceptance time in unix milliseconds.
    pub accepted_at: u64,
}

impl MembershipRecord {
    /// Builds the record of a decoded `MemberAdded` event.
    pub fn from_chain(
        group_id: U256,
        member: &ChainMemberRecord,
        accepted_at: u64,
    ) -> Self {
        Self {
            group_id,
            commitment: member.commitment,
            transaction_hash: member.transaction_hash,
            block_number: Some(member.block_number),
            chain_index: Some(member.chain_index),
            merkle_tree_root: member.merkle_tree_root,
            accepted_at,
        }
    }
}

/// A `MemberAdded` event as decoded from the chain log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMemberRecord {
    /// The group the event belongs to.
    pub group_id: U256,
    /// Leaf position in the group tree.
    pub chain_index: u64,
    /// The inserted identity commitment.
    pub commitment: U256,
    /// The root after the insertion.
    pub merkle_tree_root: Option<U256>,
    /// Block that contains the event.
    pub block_number: u64,
    /// Position of the transaction in its block.
    pub transaction_index: u64,
    /// Position of the log in its block.
    pub log_index: u64,
    /// The transaction that emitted the event.
    pub transaction_hash: H256,
}

impl ChainMemberRecord {
    /// The ordering key of the chain log: leaf index, then log position.
    pub fn sort_key(&self) -> (u64, u64, u64) {
        (self.chain_index, self.block_number, self.log_index)
    }
}

/// The authoritative tree metadata read from the Semaphore contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccumulatorState {
    /// `getMerkleTreeRoot`
    pub root: U256,
    /// `getMerkleTreeDepth`
    pub depth: u64,
    /// `getMerkleTreeSize`
    pub size: u64,
}

/// A validated, ordered membership list of a group.
///
/// Only ever produced after the members were checked to reproduce
/// [`GroupSnapshot::root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    /// The group.
    #[serde(with = "serde_decimal::compact")]
    pub group_id: U256,
    /// The tree root, as read from chain.
    #[serde(with = "serde_decimal")]
    pub root: U256,
    /// The tree depth, as read from chain.
    #[serde(serialize_with = "display")]
    pub depth: u64,
    /// The tree size, as read from chain.
    #[serde(serialize_with = "display")]
    pub size: u64,
    /// Members, oldest first.
    #[serde(rename = "members", with = "serde_decimal::vec")]
    pub ordered_commitments: Vec<U256>,
    /// Where the members were read from.
    pub source: MembershipSource,
}

fn display<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_decimal_strings() {
        let record = MembershipRecord {
            group_id: U256::from(7),
            commitment: U256::MAX,
            transaction_hash: H256::repeat_byte(0x11),
            block_number: Some(10),
            chain_index: Some(3),
            merkle_tree_root: None,
            accepted_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["groupId"], "7");
        assert_eq!(json["commitment"], U256::MAX.to_string());
        assert_eq!(json["chainIndex"], 3);
        assert!(json.get("merkleTreeRoot").is_none());

        let back: MembershipRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn snapshot_projection_matches_the_members_endpoint() {
        let snapshot = GroupSnapshot {
            group_id: U256::from(4),
            root: U256::from(99),
            depth: 2,
            size: 3,
            ordered_commitments: vec![1.into(), 2.into(), 3.into()],
            source: MembershipSource::Database,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["groupId"], "4");
        assert_eq!(json["root"], "99");
        assert_eq!(json["depth"], "2");
        assert_eq!(json["size"], "3");
        assert_eq!(json["members"], serde_json::json!(["1", "2", "3"]));
        assert_eq!(json["source"], "database");
    }
}
