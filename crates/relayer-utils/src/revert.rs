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

//! Decoding of the revert payloads returned by the Semaphore and Ombu contracts.

use std::fmt;

use ethers::abi::{self, ParamType, Token};
use ethers::utils::id;

/// Selector of the solidity `Error(string)` revert.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// A revert reason, decoded from the raw revert payload when the selector is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    /// `Semaphore__GroupDoesNotExist()`
    GroupDoesNotExist,
    /// `Semaphore__CallerIsNotTheGroupAdmin()` (`0xbb9bf278`).
    ///
    /// Semaphore checks the group admin before anything else, so a write
    /// against a group that was never created reverts with this error.
    CallerIsNotGroupAdmin,
    /// The commitment is already a leaf of the group tree.
    ///
    /// Raised either as `LeafAlreadyExists()` by the tree library or as
    /// `Semaphore__MemberAlreadyExists()` by older Semaphore deployments.
    MemberAlreadyExists,
    /// Ombu `NotAllowed()`
    NotAllowed,
    /// Ombu `PostDoesNotExist()`
    PostDoesNotExist,
    /// Ombu `MainPostDoesNotExist()`
    MainPostDoesNotExist,
    /// Ombu `UserNotGroupMember()`
    UserNotGroupMember,
    /// Ombu `AlreadyVoted()`
    AlreadyVoted,
    /// Ombu `HasNotVoted()`
    HasNotVoted,
    /// A plain `require(cond, "message")` revert.
    Message(String),
    /// The transaction receipt reported a failed status, no payload is available.
    StatusFailed,
    /// Anything else, kept as the raw payload so it can be inspected.
    Unknown(Vec<u8>),
}

fn known_custom_errors() -> [(&'static str, RevertReason); 10] {
    [
        (
            "Semaphore__GroupDoesNotExist()",
            RevertReason::GroupDoesNotExist,
        ),
        (
            "Semaphore__CallerIsNotTheGroupAdmin()",
            RevertReason::CallerIsNotGroupAdmin,
        ),
        ("LeafAlreadyExists()", RevertReason::MemberAlreadyExists),
        (
            "Semaphore__MemberAlreadyExists()",
            RevertReason::MemberAlreadyExists,
        ),
        ("NotAllowed()", RevertReason::NotAllowed),
        ("PostDoesNotExist()", RevertReason::PostDoesNotExist),
        ("MainPostDoesNotExist()", RevertReason::MainPostDoesNotExist),
        ("UserNotGroupMember()", RevertReason::UserNotGroupMember),
        ("AlreadyVoted()", RevertReason::AlreadyVoted),
        ("HasNotVoted()", RevertReason::HasNotVoted),
    ]
}

impl RevertReason {
    /// Decodes a raw revert payload.
    pub fn decode(data: &[u8]) -> Self {
        let Some(selector) = data.get(..4) else {
            return Self::Unknown(data.to_vec());
        };
        if selector == ERROR_STRING_SELECTOR {
            return match abi::decode(&[ParamType::String], &data[4..]) {
                Ok(tokens) => match tokens.into_iter().next() {
                    Some(Token::String(message)) => Self::Message(message),
                    _ => Self::Unknown(data.to_vec()),
                },
                Err(_) => Self::Unknown(data.to_vec()),
            };
        }
        known_custom_errors()
            .into_iter()
            .find(|(signature, _)| id(signature) == selector)
            .map(|(_, reason)| reason)
            .unwrap_or_else(|| Self::Unknown(data.to_vec()))
    }

    /// Whether the revert means the commitment was already inserted, which
    /// usually happens when two joins for the same commitment race each other.
    pub fn is_duplicate_member(&self) -> bool {
        match self {
            Self::MemberAlreadyExists => true,
            Self::Message(message) => {
                let message = message.to_lowercase();
                message.contains("already") && message.contains("member")
            }
            _ => false,
        }
    }

    /// Whether the revert means the target group is not usable by the relayer
    /// because it does not exist on the Semaphore contract.
    pub fn is_missing_group(&self) -> bool {
        matches!(self, Self::GroupDoesNotExist | Self::CallerIsNotGroupAdmin)
    }

    /// A short stable name of the reason.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GroupDoesNotExist => "GroupDoesNotExist",
            Self::CallerIsNotGroupAdmin => "CallerIsNotGroupAdmin",
            Self::MemberAlreadyExists => "MemberAlreadyExists",
            Self::NotAllowed => "NotAllowed",
            Self::PostDoesNotExist => "PostDoesNotExist",
            Self::MainPostDoesNotExist => "MainPostDoesNotExist",
            Self::UserNotGroupMember => "UserNotGroupMember",
            Self::AlreadyVoted => "AlreadyVoted",
            Self::HasNotVoted => "HasNotVoted",
            Self::Message(_) => "Message",
            Self::StatusFailed => "StatusFailed",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::StatusFailed => {
                write!(f, "transaction reverted (receipt status 0)")
            }
            Self::Unknown(data) => {
                write!(f, "unrecognized revert 0x{}", hex::encode(data))
            }
            other => write!(f, "{}", other.name()),
        }
    }
}
