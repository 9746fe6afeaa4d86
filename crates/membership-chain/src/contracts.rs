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

#![allow(missing_docs)]
#![allow(clippy::too_many_arguments)]

use ethers::contract::abigen;

abigen!(
    SemaphoreContract,
    r#"[
        function getMerkleTreeRoot(uint256 groupId) external view returns (uint256)
        function getMerkleTreeDepth(uint256 groupId) external view returns (uint256)
        function getMerkleTreeSize(uint256 groupId) external view returns (uint256)
        event MemberAdded(uint256 indexed groupId, uint256 index, uint256 identityCommitment, uint256 merkleTreeRoot)
    ]"#,
);

abigen!(
    OmbuContract,
    r#"[
        function groupCounter() external view returns (uint256)
        function groups(uint256 index) external view returns (uint256)
        function groupNames(uint256 groupId) external view returns (string)
        function isGroupMember(uint256 groupId, uint256 identityCommitment) external view returns (bool)
        function addMember(uint256 groupId, uint256 identityCommitment) external
        function voteOnPost(uint256 groupId, uint256 postId, bool isUpvote, uint256 identityCommitment) external
    ]"#,
);
