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
use axum::http::header;
use axum::response::IntoResponse;

use ombu_relayer_context::RelayerContext;
use ombu_relayer_utils::{Error, HandlerError};

/// Handles `GET /api/metrics` in the prometheus text exposition format.
pub async fn handle_metric_info(
    State(ctx): State<Arc<RelayerContext>>,
) -> Result<impl IntoResponse, HandlerError> {
    let metric_gathered = ctx
        .metrics
        .lock()
        .await
        .gather_metrics()
        .map_err(Error::from)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metric_gathered,
    ))
}
