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
use ombu_tx_relay::{VoteOutcome, VoteRequest};

use super::rejected;

/// Vote response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    success: bool,
    transaction_hash: H256,
    block_number: Option<u64>,
    #[serde(with = "serde_decimal::option")]
    gas_used: Option<U256>,
}

impl From<VoteOutcome> for VoteResponse {
    fn from(outcome: VoteOutcome) -> Self {
        Self {
            success: true,
            transaction_hash: outcome.transaction_hash,
            block_number: outcome.block_number,
            gas_used: outcome.gas_used,
        }
    }
}

/// Handles `POST /api/vote`.
///
/// The voter must already be a member of the group on chain.
pub async fn handle_vote(
    State(ctx): State<Arc<RelayerContext>>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>, HandlerError> {
    let Json(request) = payload.map_err(rejected)?;
    let outcome = ctx.coordinator().vote(request).await.map_err(|e| {
        tracing::warn!(%e, "Vote failed");
        HandlerError::from(e)
    })?;
    Ok(Json(outcome.into()))
}
