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

use std::path::Path;

use ethers::types::U256;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use ombu_relayer_types::MembershipRecord;
use ombu_relayer_utils::{probe, Error};

use super::{group_prefix, record_key, unique_key, MembershipStore};

const RECORDS_TREE: &str = "membership/records";
const UNIQUE_TREE: &str = "membership/unique";

/// SledStore is a store that keeps the membership records in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    records: sled::Tree,
    unique: sled::Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Self::from_db(db)
    }

    /// Creates a temporary SledStore, removed when dropped.
    pub fn temporary() -> crate::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> crate::Result<Self> {
        let records = db.open_tree(RECORDS_TREE)?;
        let unique = db.open_tree(UNIQUE_TREE)?;
        Ok(Self {
            db,
            records,
            unique,
        })
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn decode(value: &[u8]) -> crate::Result<MembershipRecord> {
        serde_json::from_slice(value).map_err(|e| Error::StoreUnavailable {
            reason: format!("corrupted membership record: {e}"),
        })
    }
}

impl MembershipStore for SledStore {
    #[tracing::instrument(skip(self), fields(group_id = %record.group_id, commitment = %record.commitment))]
    fn append(&self, record: &MembershipRecord) -> crate::Result<()> {
        let value = serde_json::to_vec(record)?;
        let seq = self.db.generate_id()?;
        let key = record_key(record, seq);
        let unique = unique_key(record.group_id, record.commitment);
        // both trees change together or not at all.
        let result = (&self.records, &self.unique).transaction(
            |(records, uniques)| {
                if uniques.get(unique)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                uniques.insert(&unique[..], &key[..])?;
                records.insert(&key[..], value.as_slice())?;
                Ok(())
            },
        );
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(Error::DuplicateMember {
                    group_id: record.group_id,
                    commitment: record.commitment,
                })
            }
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }
        self.db.flush()?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::MembershipStore,
            appended = true,
            group_id = %record.group_id,
            chain_index = ?record.chain_index,
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn list_by_group(
        &self,
        group_id: U256,
    ) -> crate::Result<Vec<MembershipRecord>> {
        self.records
            .scan_prefix(group_prefix(group_id))
            .values()
            .map(|value| Self::decode(&value?))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    fn list_all(&self) -> crate::Result<Vec<MembershipRecord>> {
        self.records
            .iter()
            .values()
            .map(|value| Self::decode(&value?))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    fn contains(&self, group_id: U256, commitment: U256) -> crate::Result<bool> {
        Ok(self.unique.contains_key(unique_key(group_id, commitment))?)
    }
}
