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

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ethers::types::U256;
use serde::Serialize;

use ombu_relayer_context::RelayerContext;
use ombu_relayer_store::MembershipStore;
use ombu_relayer_types::{serde_decimal, MembershipRecord};
use ombu_relayer_utils::HandlerError;

use super::{parse_group_id, rejected};

/// Admin members response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMembersResponse {
    success: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "serde_decimal::option"
    )]
    group_id: Option<U256>,
    member_count: usize,
    members: Vec<MembershipRecord>,
}

fn ensure_enabled(ctx: &RelayerContext) -> Result<(), HandlerError> {
    if ctx.config.features.admin_api {
        return Ok(());
    }
    tracing::warn!("Admin API is not enabled for relayer.");
    Err(HandlerError::new(
        StatusCode::FORBIDDEN,
        "FEATURE_DISABLED",
        "Admin API is not enabled for relayer.",
    ))
}

/// Handles `GET /api/admin/members/:groupId`: the stored records of one
/// group, in acceptance order.
pub async fn handle_admin_group_members(
    State(ctx): State<Arc<RelayerContext>>,
    group_id: Result<Path<String>, PathRejection>,
) -> Result<Json<AdminMembersResponse>, HandlerError> {
    ensure_enabled(&ctx)?;
    let Path(group_id) = group_id.map_err(rejected)?;
    let group_id = parse_group_id(&group_id)?;
    let members = ctx.store().list_by_group(group_id)?;
    Ok(Json(AdminMembersResponse {
        success: true,
        group_id: Some(group_id),
        member_count: members.len(),
        members,
    }))
}

/// Handles `GET /api/admin/members`: every stored record.
pub async fn handle_admin_members(
    State(ctx): State<Arc<RelayerContext>>,
) -> Result<Json<AdminMembersResponse>, HandlerError> {
    ensure_enabled(&ctx)?;
    let members = ctx.store().list_all()?;
    Ok(Json(AdminMembersResponse {
        success: true,
        group_id: None,
        member_count: members.len(),
        members,
    }))
}
