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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Ombu Relayer Crate 🕸️
//!
//! A relayer that lets users join Semaphore groups of the Ombu contract and
//! vote on posts without paying for gas, and that serves the ordered member
//! lists needed to build Semaphore proofs.
//!
//! ## Overview
//!
//! The relayer signs every `addMember` and `voteOnPost` transaction with its
//! own account. After a confirmed join it records the `MemberAdded` event
//! (leaf index, commitment, root) in a local [sled](https://sled.rs) store.
//!
//! Proof generation needs the full member list of a group, in insertion
//! order. The relayer assembles it from the store, or from a volatile cache,
//! or by scanning the Semaphore `MemberAdded` logs. It then recomputes the
//! Lean IMT root and only answers when that root equals the on-chain one.
//!
//! # Features
//!
//! * `cli`: Builds the `ombu-relayer` binary. By default, this is enabled.
//! * `integration-tests`: Logs as JSON lines, easy to parse from tests. By default, this is disabled.

/// HTTP server and background tasks.
pub mod service;

pub use ombu_relayer_utils::{Error, Result};
