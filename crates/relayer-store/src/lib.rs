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
//! # Relayer Store Module 🕸️
//!
//! Storage of the relayer's membership bookkeeping.
//!
//! ## Overview
//!
//! The [`MembershipStore`] is the durable record of every accepted join,
//! ordered the way the members were inserted on chain. The
//! [`MembershipCache`] is a process local, lossy copy of membership lists
//! that only ever serves as a hint.

use ethers::types::U256;

use ombu_relayer_types::MembershipRecord;
use ombu_relayer_utils::Result;

/// The volatile membership cache.
pub mod cache;
/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

pub use cache::{CacheBackend, InMemoryCacheBackend, MembershipCache};
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;
/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;

/// The durable record of accepted joins.
///
/// Records of a group are returned in acceptance order. A commitment is
/// recorded at most once per group: appending it again fails with
/// [`ombu_relayer_utils::Error::DuplicateMember`] and writes nothing, which
/// callers treat as success.
pub trait MembershipStore: Send + Sync {
    /// Persists a record.
    fn append(&self, record: &MembershipRecord) -> Result<()>;
    /// All records of a group, oldest first.
    fn list_by_group(&self, group_id: U256) -> Result<Vec<MembershipRecord>>;
    /// All records, by group, then oldest first.
    fn list_all(&self) -> Result<Vec<MembershipRecord>>;
    /// Whether the commitment is recorded for the group.
    fn contains(&self, group_id: U256, commitment: U256) -> Result<bool>;
}

/// Length of a record key.
const RECORD_KEY_LEN: usize = 32 + 8 + 8 + 8;

/// The ordering key of a record inside its group.
///
/// `group_id ++ accepted_at ++ chain_index ++ seq`, all big endian, so a
/// byte-wise scan yields acceptance order. Records accepted in the same
/// millisecond are ordered by their leaf index, records without one go last.
pub(crate) fn record_key(
    record: &MembershipRecord,
    seq: u64,
) -> [u8; RECORD_KEY_LEN] {
    let mut key = [0u8; RECORD_KEY_LEN];
    record.group_id.to_big_endian(&mut key[..32]);
    key[32..40].copy_from_slice(&record.accepted_at.to_be_bytes());
    key[40..48].copy_from_slice(
        &record.chain_index.unwrap_or(u64::MAX).to_be_bytes(),
    );
    key[48..].copy_from_slice(&seq.to_be_bytes());
    key
}

/// The uniqueness key of a record: `group_id ++ commitment`.
pub(crate) fn unique_key(group_id: U256, commitment: U256) -> [u8; 64] {
    let mut key = [0u8; 64];
    group_id.to_big_endian(&mut key[..32]);
    commitment.to_big_endian(&mut key[32..]);
    key
}

/// The key prefix shared by all records of a group.
pub(crate) fn group_prefix(group_id: U256) -> [u8; 32] {
    let mut prefix = [0u8; 32];
    group_id.to_big_endian(&mut prefix);
    prefix
}
