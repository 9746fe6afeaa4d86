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

//! Relayer handlers for HTTP calls
#![warn(missing_docs)]

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use ombu_relayer_context::RelayerContext;

/// Module handles relayer API
pub mod routes;

pub use routes::info::{handle_health, handle_relayer_info};

/// The router of the relayer, with its state attached.
///
/// Every membership route is nested under `/api`. `/health` and `/` stay at
/// the root for load balancers.
pub fn build_router(ctx: RelayerContext) -> Router {
    Router::new()
        .nest("/api", routes::build_web_services())
        .route("/", get(handle_relayer_info))
        .route("/health", get(handle_health))
        .with_state(Arc::new(ctx))
}
