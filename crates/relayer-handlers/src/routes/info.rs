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
use ethers::types::Address;
use serde::Serialize;

use ombu_relayer_config::OmbuRelayerConfig;
use ombu_relayer_context::RelayerContext;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    message: &'static str,
    contract: Address,
    network: String,
}

/// Handles `GET /health`.
pub async fn handle_health(
    State(ctx): State<Arc<RelayerContext>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Relayer is running",
        contract: ctx.config.contracts.ombu.address,
        network: ctx.config.chain.name.clone(),
    })
}

/// Relayer information response
#[derive(Debug, Serialize)]
pub struct RelayerInformationResponse {
    message: &'static str,
    endpoints: Vec<&'static str>,
    #[serde(flatten)]
    config: OmbuRelayerConfig,
}

/// Handles `GET /`: the served endpoints and the public part of the
/// configuration. Secrets are never serialized.
pub async fn handle_relayer_info(
    State(ctx): State<Arc<RelayerContext>>,
) -> Json<RelayerInformationResponse> {
    Json(RelayerInformationResponse {
        message: "Ombu Relayer API",
        endpoints: vec![
            "/health",
            "/api/join",
            "/api/vote",
            "/api/members/:groupId",
            "/api/check-member",
            "/api/groups",
            "/api/admin/members",
            "/api/admin/members/:groupId",
            "/api/metrics",
        ],
        config: ctx.config.clone(),
    })
}
