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

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ethers::types::U256;
use parking_lot::RwLock;

use ombu_relayer_types::MembershipRecord;
use ombu_relayer_utils::Error;

use super::{group_prefix, record_key, MembershipStore, RECORD_KEY_LEN};

#[derive(Default)]
struct MemState {
    seq: u64,
    records: BTreeMap<[u8; RECORD_KEY_LEN], MembershipRecord>,
    unique: HashSet<(U256, U256)>,
}

/// InMemoryStore is a store that keeps the membership records in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemState>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl MembershipStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn append(&self, record: &MembershipRecord) -> crate::Result<()> {
        let mut guard = self.state.write();
        if !guard.unique.insert((record.group_id, record.commitment)) {
            return Err(Error::DuplicateMember {
                group_id: record.group_id,
                commitment: record.commitment,
            });
        }
        guard.seq += 1;
        let key = record_key(record, guard.seq);
        guard.records.insert(key, record.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn list_by_group(
        &self,
        group_id: U256,
    ) -> crate::Result<Vec<MembershipRecord>> {
        let prefix = group_prefix(group_id);
        let guard = self.state.read();
        let records = guard
            .records
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, record)| record.clone())
            .collect();
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    fn list_all(&self) -> crate::Result<Vec<MembershipRecord>> {
        Ok(self.state.read().records.values().cloned().collect())
    }

    #[tracing::instrument(skip(self))]
    fn contains(&self, group_id: U256, commitment: U256) -> crate::Result<bool> {
        Ok(self.state.read().unique.contains(&(group_id, commitment)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::check_store_contract;

    #[test]
    fn in_memory_store_honours_the_store_contract() {
        check_store_contract(&InMemoryStore::default());
    }
}
