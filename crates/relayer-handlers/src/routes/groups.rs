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

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use ombu_group_state::GroupList;
use ombu_relayer_context::RelayerContext;
use ombu_relayer_utils::HandlerError;

/// Groups response
#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    success: bool,
    #[serde(flatten)]
    list: GroupList,
}

/// Handles `GET /api/groups`: every group registered on the Ombu contract,
/// oldest first.
pub async fn handle_groups(
    State(ctx): State<Arc<RelayerContext>>,
) -> Result<Json<GroupsResponse>, HandlerError> {
    let list = ctx.assembler().list_groups().await?;
    Ok(Json(GroupsResponse {
        success: true,
        list,
    }))
}
