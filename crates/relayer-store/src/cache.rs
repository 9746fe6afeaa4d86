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

use std::collections::HashMap;

use ethers::types::U256;
use parking_lot::Mutex;

use ombu_relayer_utils::probe;

/// Storage behind the [`MembershipCache`].
pub trait CacheBackend: Send + Sync {
    /// The cached members of a group.
    fn get(&self, group_id: U256) -> Option<Vec<U256>>;
    /// Replaces the members of a group.
    fn put(&self, group_id: U256, members: Vec<U256>);
    /// Appends a member to an existing entry, returns whether it was appended.
    fn append_if_present(&self, group_id: U256, commitment: U256) -> bool;
    /// Drops the entry of a group.
    fn remove(&self, group_id: U256);
    /// Number of cached groups.
    fn len(&self) -> usize;
}

#[derive(Default)]
struct Entries {
    clock: u64,
    // group -> (last write, members)
    groups: HashMap<U256, (u64, Vec<U256>)>,
}

/// A bounded in-memory [`CacheBackend`].
///
/// When full, writing a new group evicts the group written least recently.
pub struct InMemoryCacheBackend {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl InMemoryCacheBackend {
    /// Creates a backend holding at most `capacity` groups (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, group_id: U256) -> Option<Vec<U256>> {
        self.entries
            .lock()
            .groups
            .get(&group_id)
            .map(|(_, members)| members.clone())
    }

    fn put(&self, group_id: U256, members: Vec<U256>) {
        let mut entries = self.entries.lock();
        if !entries.groups.contains_key(&group_id)
            && entries.groups.len() >= self.capacity
        {
            let oldest = entries
                .groups
                .iter()
                .min_by_key(|(_, (written, _))| *written)
                .map(|(group, _)| *group);
            if let Some(oldest) = oldest {
                entries.groups.remove(&oldest);
            }
        }
        entries.clock += 1;
        let written = entries.clock;
        entries.groups.insert(group_id, (written, members));
    }

    fn append_if_present(&self, group_id: U256, commitment: U256) -> bool {
        let mut entries = self.entries.lock();
        entries.clock += 1;
        let written = entries.clock;
        match entries.groups.get_mut(&group_id) {
            Some((stamp, members)) if !members.contains(&commitment) => {
                *stamp = written;
                members.push(commitment);
                true
            }
            _ => false,
        }
    }

    fn remove(&self, group_id: U256) {
        self.entries.lock().groups.remove(&group_id);
    }

    fn len(&self) -> usize {
        self.entries.lock().groups.len()
    }
}

/// The volatile membership cache.
///
/// A process local, lossy copy of ordered membership lists. Entries may be
/// stale or incomplete: joins handled by another relayer instance, or before
/// the entry was created, are not in it. It is a hint and never a substitute
/// for validating a membership list against the on-chain root.
pub struct MembershipCache<B: CacheBackend = InMemoryCacheBackend> {
    backend: B,
}

impl MembershipCache<InMemoryCacheBackend> {
    /// Creates an in-memory cache holding at most `max_groups` groups.
    pub fn in_memory(max_groups: usize) -> Self {
        Self::new(InMemoryCacheBackend::new(max_groups))
    }
}

impl<B: CacheBackend> MembershipCache<B> {
    /// Creates a cache over the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The cached, ordered members of a group.
    pub fn get(&self, group_id: U256) -> Option<Vec<U256>> {
        self.backend.get(group_id)
    }

    /// Replaces the members of a group with a complete, ordered list.
    pub fn set(&self, group_id: U256, members: Vec<U256>) {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::MembershipCache,
            %group_id,
            members = members.len(),
        );
        self.backend.put(group_id, members);
    }

    /// Appends a member, only if the group was listed before.
    ///
    /// A group never listed in full gets no entry: a lone member would
    /// look like a complete list. Returns whether the member was appended.
    pub fn add_if_present(&self, group_id: U256, commitment: U256) -> bool {
        let appended = self.backend.append_if_present(group_id, commitment);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::MembershipCache,
            %group_id,
            appended,
        );
        appended
    }

    /// Forgets a group.
    pub fn invalidate(&self, group_id: U256) {
        self.backend.remove(group_id);
    }

    /// Number of cached groups.
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Whether no group is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> Vec<U256> {
        values.iter().copied().map(U256::from).collect()
    }

    #[test]
    fn add_if_present_never_creates_entries() {
        let cache = MembershipCache::in_memory(8);
        assert!(!cache.add_if_present(1.into(), 10.into()));
        assert_eq!(cache.get(1.into()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn add_if_present_keeps_order_and_skips_duplicates() {
        let cache = MembershipCache::in_memory(8);
        cache.set(1.into(), ids(&[3, 1]));
        assert!(cache.add_if_present(1.into(), 2.into()));
        assert!(!cache.add_if_present(1.into(), 3.into()));
        assert_eq!(cache.get(1.into()), Some(ids(&[3, 1, 2])));
    }

    #[test]
    fn evicts_the_least_recently_written_group() {
        let cache = MembershipCache::in_memory(2);
        cache.set(1.into(), ids(&[1]));
        cache.set(2.into(), ids(&[2]));
        // group 1 is written again, group 2 becomes the oldest
        cache.add_if_present(1.into(), 5.into());
        cache.set(3.into(), ids(&[3]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(2.into()), None);
        assert_eq!(cache.get(1.into()), Some(ids(&[1, 5])));
        assert_eq!(cache.get(3.into()), Some(ids(&[3])));
    }

    #[test]
    fn invalidate_forgets_the_group() {
        let cache = MembershipCache::in_memory(2);
        cache.set(1.into(), ids(&[1]));
        cache.invalidate(1.into());
        assert_eq!(cache.get(1.into()), None);
    }
}
