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

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use ethers::types::U256;

use ombu_relayer_context::RelayerContext;
use ombu_relayer_types::serde_decimal::parse_u256;
use ombu_relayer_utils::{Error, HandlerError};

/// Admin views of the membership store.
pub mod admin;
/// Ombu group listing.
pub mod groups;
/// Relayer information and health.
pub mod info;
/// Joining a group.
pub mod join;
/// Group membership reads.
pub mod members;
/// Prometheus metrics.
pub mod metric;
/// Voting on posts.
pub mod vote;

/// The routes served under `/api`.
pub fn build_web_services() -> Router<Arc<RelayerContext>> {
    Router::new()
        .route("/join", post(join::handle_join))
        .route("/vote", post(vote::handle_vote))
        .route("/members/:group_id", get(members::handle_group_members))
        .route("/check-member", get(members::handle_check_member))
        .route("/groups", get(groups::handle_groups))
        .route("/admin/members", get(admin::handle_admin_members))
        .route(
            "/admin/members/:group_id",
            get(admin::handle_admin_group_members),
        )
        .route("/metrics", get(metric::handle_metric_info))
}

/// Turns an extractor rejection into the structured error body.
pub(crate) fn rejected(rejection: impl std::fmt::Display) -> HandlerError {
    Error::InvalidRequest(rejection.to_string()).into()
}

/// Parses a group id given as a decimal or `0x` hex string.
pub(crate) fn parse_group_id(value: &str) -> Result<U256, HandlerError> {
    parse_u256(value).ok_or_else(|| {
        Error::InvalidRequest(format!("groupId {value:?} is not a uint256"))
            .into()
    })
}
