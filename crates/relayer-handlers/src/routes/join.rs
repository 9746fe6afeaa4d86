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

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use ethers::types::{H256, U256};
use serde::Serialize;

use ombu_relayer_context::RelayerContext;
use ombu_relayer_types::serde_decimal;
use ombu_relayer_utils::HandlerError;
use ombu_tx_relay::{JoinOutcome, JoinRequest};

use super::rejected;

/// Join response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_number: Option<u64>,
    #[serde(with = "serde_decimal")]
    group_id: U256,
}

impl From<JoinOutcome> for JoinResponse {
    fn from(outcome: JoinOutcome) -> Self {
        match outcome {
            JoinOutcome::Joined {
                group_id,
                transaction_hash,
                block_number,
                ..
            } => Self {
                success: true,
                message: None,
                transaction_hash: Some(transaction_hash),
                block_number,
                group_id,
            },
            JoinOutcome::AlreadyMember { group_id, .. } => Self {
                success: true,
                message: Some("Already a member"),
                transaction_hash: None,
                block_number: None,
                group_id,
            },
        }
    }
}

/// Handles `POST /api/join`.
///
/// Adds the identity commitment to the requested group, or to the latest
/// Ombu group when none is given. Joining twice succeeds with
/// `"Already a member"`.
pub async fn handle_join(
    State(ctx): State<Arc<RelayerContext>>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<JoinResponse>, HandlerError> {
    let Json(request) = payload.map_err(rejected)?;
    let outcome = ctx.coordinator().join(request).await.map_err(|e| {
        tracing::warn!(%e, "Join failed");
        HandlerError::from(e)
    })?;
    Ok(Json(outcome.into()))
}
