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

//! # Relayer Service Module 🕸️
//!
//! A module for starting the HTTP server and the background tasks.
//!
//! ## Overview
//!
//! Services are tasks which the relayer runs throughout its lifetime: the
//! HTTP API, a one-off cache warm-up and the periodic store size metric.

use std::net::SocketAddr;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ombu_relayer_context::RelayerContext;
use ombu_relayer_handlers::build_router;
use ombu_relayer_store::SledStore;
use ombu_relayer_utils::probe;

/// Type alias for [Sled](https://sled.rs)-based database store
pub type Store = SledStore;

/// How often the store size gauge is refreshed.
const STORE_METRIC_INTERVAL: Duration = Duration::from_secs(3600);

/// Serves the HTTP API until the relayer shuts down.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration
pub async fn build_web_services(ctx: RelayerContext) -> crate::Result<()> {
    let socket_addr = SocketAddr::new([0, 0, 0, 0].into(), ctx.config.port);
    let mut shutdown = ctx.shutdown_signal();
    let app = build_router(ctx)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .into_make_service_with_connect_info::<SocketAddr>();

    tracing::info!("Starting the server on {}", socket_addr);
    axum::Server::try_bind(&socket_addr)?
        .serve(app)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

/// Starts the background tasks.
///
/// Does not block, every task runs on its own and stops on shutdown.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration
/// * `store` - [Sled](https://sled.rs)-based database store, for its size
pub fn ignite(ctx: &RelayerContext, store: Store) {
    tracing::trace!(
        "Relayer configuration: {}",
        serde_json::to_string_pretty(&ctx.config)
            .unwrap_or_else(|e| e.to_string())
    );
    if ctx.config.features.warm_cache {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut shutdown = ctx.shutdown_signal();
            tokio::select! {
                _ = warm_cache(&ctx) => {},
                _ = shutdown.recv() => {},
            }
        });
    }
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown_signal();
        tokio::select! {
            _ = record_store_size(&ctx, store) => {},
            _ = shutdown.recv() => {},
        }
    });
}

/// Assembles one group so the first proof request finds a warm cache.
///
/// The group is `default-group-id`, or the latest Ombu group. Failures are
/// logged and otherwise ignored.
pub async fn warm_cache(ctx: &RelayerContext) {
    let target = match ctx.config.default_group_id {
        Some(group_id) => Ok(group_id),
        None => ctx.assembler().latest_group().await,
    };
    let group_id = match target {
        Ok(group_id) => group_id,
        Err(e) => {
            tracing::warn!(%e, "No group to warm the membership cache with");
            return;
        }
    };
    match ctx.assembler().assemble(group_id).await {
        Ok(snapshot) => {
            tracing::info!(
                %group_id,
                size = snapshot.size,
                source = %snapshot.source,
                "Membership cache warmed up",
            );
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::MembershipCache,
                warmed = true,
                %group_id,
                size = snapshot.size,
            );
        }
        Err(e) => {
            tracing::warn!(%group_id, %e, "Failed to warm the membership cache");
        }
    }
}

/// Records the on-disk size of the store every hour.
async fn record_store_size(ctx: &RelayerContext, store: Store) {
    let mut interval = tokio::time::interval(STORE_METRIC_INTERVAL);
    loop {
        interval.tick().await;
        ctx.metrics
            .lock()
            .await
            .total_amount_of_data_stored
            .set(store.get_data_stored_size() as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ethers::types::U256;
    use ombu_membership_chain::MockedMembershipChain;
    use ombu_relayer_store::InMemoryStore;

    use super::*;

    fn context(chain: Arc<MockedMembershipChain>, extra: &str) -> RelayerContext {
        let config = serde_json::from_str(&format!(
            r#"{{ "chain": {{ "http-endpoint": "http://localhost:8545" }}{extra} }}"#
        ))
        .unwrap();
        RelayerContext::with_chain(
            config,
            Arc::new(InMemoryStore::default()),
            chain,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn warm_up_fills_the_cache_of_the_latest_group() {
        let chain = Arc::new(MockedMembershipChain::default());
        chain.create_group(U256::from(3), "old");
        chain.create_group(U256::from(4), "latest");
        for commitment in [7u64, 8] {
            chain
                .add_member_directly(U256::from(4), U256::from(commitment))
                .unwrap();
        }
        let ctx = context(chain, "");
        warm_cache(&ctx).await;
        assert_eq!(
            ctx.cache().get(U256::from(4)),
            Some(vec![U256::from(7), U256::from(8)])
        );
        assert_eq!(ctx.cache().get(U256::from(3)), None);
    }

    #[tokio::test]
    async fn warm_up_prefers_the_configured_group() {
        let chain = Arc::new(MockedMembershipChain::default());
        chain.create_group(U256::from(3), "default");
        chain.create_group(U256::from(4), "latest");
        chain
            .add_member_directly(U256::from(3), U256::from(9))
            .unwrap();
        let ctx = context(chain, r#", "default-group-id": "3""#);
        warm_cache(&ctx).await;
        assert_eq!(ctx.cache().get(U256::from(3)), Some(vec![U256::from(9)]));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn warm_up_without_groups_only_logs() {
        let ctx = context(Arc::new(MockedMembershipChain::default()), "");
        warm_cache(&ctx).await;
        assert!(ctx.cache().is_empty());
        assert!(logs_contain("No group to warm the membership cache with"));
    }
}
