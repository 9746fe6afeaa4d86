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
//! # Membership Tree 🌳
//!
//! The group accumulator of Semaphore: a Lean incremental Merkle tree.
//!
//! Unlike a fixed depth sparse tree there are no zero leaves. A node with no
//! right sibling is carried up unchanged, the depth grows with the number of
//! leaves and the root of a single leaf tree is the leaf itself. Rebuilding
//! the tree from the ordered member list and comparing roots is how the
//! relayer proves a membership list is the one the verifier contract uses.

use ethers::types::U256;

use ombu_relayer_utils::Result;

mod poseidon;

pub use poseidon::{compute_root, fr_to_u256, u256_to_fr, PoseidonHasher};

/// A two-to-one hash used to build inner nodes.
pub trait TreeHasher {
    /// The node type of the tree.
    type Node: Clone + PartialEq + std::fmt::Debug;

    /// Hashes a left and a right child into their parent.
    fn hash_pair(
        &self,
        left: &Self::Node,
        right: &Self::Node,
    ) -> Result<Self::Node>;
}

/// A Lean incremental Merkle tree.
#[derive(Debug, Clone)]
pub struct LeanIMT<H: TreeHasher> {
    hasher: H,
    // levels[0] are the leaves, the last level holds the root.
    levels: Vec<Vec<H::Node>>,
}

impl<H: TreeHasher> LeanIMT<H> {
    /// Creates an empty tree.
    pub fn new(hasher: H) -> Self {
        Self {
            hasher,
            levels: vec![Vec::new()],
        }
    }

    /// Creates a tree from leaves, inserted in the given order.
    pub fn from_leaves<I>(hasher: H, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = H::Node>,
    {
        let mut tree = Self::new(hasher);
        tree.insert_many(leaves)?;
        Ok(tree)
    }

    /// Number of leaves.
    pub fn size(&self) -> usize {
        self.levels[0].len()
    }

    /// Current depth, `ceil(log2(size))`, zero for up to one leaf.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// The root, `None` while the tree is empty.
    pub fn root(&self) -> Option<&H::Node> {
        self.levels[self.depth()].first()
    }

    /// The leaves in insertion order.
    pub fn leaves(&self) -> &[H::Node] {
        &self.levels[0]
    }

    /// Position of a leaf, if present.
    pub fn index_of(&self, leaf: &H::Node) -> Option<usize> {
        self.levels[0].iter().position(|l| l == leaf)
    }

    /// Appends a leaf and updates the path up to the root.
    pub fn insert(&mut self, leaf: H::Node) -> Result<()> {
        let mut index = self.size();
        if (1usize << self.depth()) < index + 1 {
            self.levels.push(Vec::new());
        }
        let mut node = leaf.clone();
        self.levels[0].push(leaf);
        for level in 0..self.depth() {
            if index & 1 == 1 {
                let sibling = &self.levels[level][index - 1];
                node = self.hasher.hash_pair(sibling, &node)?;
            }
            index >>= 1;
            let parents = &mut self.levels[level + 1];
            if index < parents.len() {
                parents[index] = node.clone();
            } else {
                parents.push(node.clone());
            }
        }
        Ok(())
    }

    /// Appends leaves in order.
    pub fn insert_many<I>(&mut self, leaves: I) -> Result<()>
    where
        I: IntoIterator<Item = H::Node>,
    {
        leaves.into_iter().try_for_each(|leaf| self.insert(leaf))
    }
}

impl LeanIMT<PoseidonHasher> {
    /// The root as a `U256`, zero for an empty tree like the contract reports.
    pub fn root_or_zero(&self) -> U256 {
        self.root().copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A hasher whose output spells the tree shape, so expected roots can be
    /// written by hand.
    #[derive(Debug, Clone, Copy)]
    struct Concat;

    impl TreeHasher for Concat {
        type Node = String;

        fn hash_pair(&self, left: &String, right: &String) -> Result<String> {
            Ok(format!("({left},{right})"))
        }
    }

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    /// The tree computed level by level from scratch.
    fn reference_root(leaves: &[String]) -> Option<String> {
        if leaves.is_empty() {
            return None;
        }
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [l, r] => format!("({l},{r})"),
                    [l] => l.clone(),
                    _ => unreachable!(),
                })
                .collect();
        }
        level.pop()
    }

    #[test]
    fn empty_tree_has_no_root() {
        let tree = LeanIMT::new(Concat);
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.root(), None);
    }

    #[test]
    fn single_leaf_is_the_root() {
        let tree = LeanIMT::from_leaves(Concat, leaves(1)).unwrap();
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.root().map(String::as_str), Some("0"));
    }

    #[test]
    fn lonely_nodes_are_carried_up() {
        let tree = LeanIMT::from_leaves(Concat, leaves(3)).unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.root().map(String::as_str), Some("((0,1),2)"));

        let tree = LeanIMT::from_leaves(Concat, leaves(5)).unwrap();
        assert_eq!(tree.depth(), 3);
        assert_eq!(
            tree.root().map(String::as_str),
            Some("(((0,1),(2,3)),4)")
        );
    }

    #[test]
    fn incremental_inserts_match_the_reference_tree() {
        let mut tree = LeanIMT::new(Concat);
        for n in 1..=33 {
            tree.insert((n - 1).to_string()).unwrap();
            let expected = reference_root(&leaves(n));
            assert_eq!(tree.root().cloned(), expected, "size {n}");
            let expected_depth = (n as f64).log2().ceil() as usize;
            assert_eq!(tree.depth(), expected_depth, "size {n}");
        }
    }

    #[test]
    fn order_changes_the_root() {
        let a = LeanIMT::from_leaves(Concat, leaves(4)).unwrap();
        let mut swapped = leaves(4);
        swapped.swap(1, 2);
        let b = LeanIMT::from_leaves(Concat, swapped).unwrap();
        assert_ne!(a.root(), b.root());
        assert_eq!(a.index_of(&"2".to_string()), Some(2));
        assert_eq!(b.index_of(&"2".to_string()), Some(1));
    }
}
