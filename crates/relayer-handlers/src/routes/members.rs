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

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

use ombu_relayer_context::RelayerContext;
use ombu_relayer_types::{serde_decimal, GroupSnapshot, MembershipSource};
use ombu_relayer_utils::{Error, HandlerError};
use ombu_tx_relay::parse_commitment;

use super::{parse_group_id, rejected};

/// Handles `GET /api/members/:groupId`.
///
/// Returns the ordered member list of the group, only once its root has
/// been checked against the on-chain root.
pub async fn handle_group_members(
    State(ctx): State<Arc<RelayerContext>>,
    group_id: Result<Path<String>, PathRejection>,
) -> Result<Json<GroupSnapshot>, HandlerError> {
    let Path(group_id) = group_id.map_err(rejected)?;
    let group_id = parse_group_id(&group_id)?;
    let snapshot = ctx.assembler().assemble(group_id).await?;
    Ok(Json(snapshot))
}

/// Query of `GET /api/check-member`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMemberQuery {
    identity_commitment: Option<String>,
    group_id: Option<String>,
}

/// Check member response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMemberResponse {
    success: bool,
    is_member: bool,
    source: MembershipSource,
    #[serde(with = "serde_decimal")]
    group_id: U256,
    #[serde(with = "serde_decimal")]
    identity_commitment: U256,
}

/// Handles `GET /api/check-member?identityCommitment&groupId`.
///
/// The store answers first, the Ombu contract is asked when the store has
/// no record or is unavailable.
pub async fn handle_check_member(
    State(ctx): State<Arc<RelayerContext>>,
    query: Result<Query<CheckMemberQuery>, QueryRejection>,
) -> Result<Json<CheckMemberResponse>, HandlerError> {
    let Query(query) = query.map_err(rejected)?;
    let identity_commitment =
        parse_commitment(query.identity_commitment.as_deref().unwrap_or_default())?;
    let group_id = query
        .group_id
        .as_deref()
        .ok_or_else(|| Error::InvalidRequest("groupId is required".into()))?;
    let group_id = parse_group_id(group_id)?;
    let (is_member, source) = ctx
        .assembler()
        .is_member(group_id, identity_commitment)
        .await?;
    Ok(Json(CheckMemberResponse {
        success: true,
        is_member,
        source,
        group_id,
        identity_commitment,
    }))
}
