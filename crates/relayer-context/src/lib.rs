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

#![warn(missing_docs)]
//! # Relayer Context Module 🕸️
//!
//! A module for managing the context of the relayer.
//!
//! The [`RelayerContext`] wires the chain client, the membership store and
//! cache, the chain log reader, the group state assembler and the
//! membership coordinator together, once, at startup. Every request
//! handler works off a clone of it.
use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Provider, RetryClientBuilder};
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::{broadcast, Mutex};

use ombu_group_state::GroupStateAssembler;
use ombu_log_reader::{ChainLogReader, ScanPolicy};
use ombu_membership_chain::{
    EthersClient, EthersMembershipChain, MembershipChain,
};
use ombu_relayer_config::OmbuRelayerConfig;
use ombu_relayer_store::{MembershipCache, MembershipStore};
use ombu_relayer_utils::metric::{self, Metrics};
use ombu_tx_relay::MembershipCoordinator;

mod ethers_retry_policy;

pub use ethers_retry_policy::OmbuHttpRetryPolicy;

/// RelayerContext contains Relayer's configuration, its membership
/// components and the shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: OmbuRelayerConfig,
    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// The initial `shutdown` trigger is provided by the `run` caller. The
    /// server is responsible for gracefully shutting down active connections.
    /// When a connection task is spawned, it is passed a broadcast receiver
    /// handle. When a graceful shutdown is initiated, a `()` value is sent via
    /// the broadcast::Sender. Each active connection receives it, reaches a
    /// safe terminal state, and completes the task.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the relayer
    pub metrics: Arc<Mutex<metric::Metrics>>,
    store: Arc<dyn MembershipStore>,
    cache: Arc<MembershipCache>,
    chain: Arc<dyn MembershipChain>,
    assembler: GroupStateAssembler,
    coordinator: MembershipCoordinator,
}

impl RelayerContext {
    /// Creates a new RelayerContext, connected to the configured node.
    pub fn new(
        config: OmbuRelayerConfig,
        store: Arc<dyn MembershipStore>,
    ) -> ombu_relayer_utils::Result<Self> {
        let provider = Arc::new(evm_provider(&config)?);
        let wallet = evm_wallet(&config)?;
        tracing::debug!(
            relayer = ?wallet.address(),
            chain_id = config.chain.chain_id,
            endpoint = %config.chain.http_endpoint,
            "Connecting to the chain",
        );
        let chain = EthersMembershipChain::new(
            provider,
            wallet,
            config.contracts.semaphore.address,
            config.contracts.ombu.address,
            Duration::from_millis(config.chain.receipt_poll_interval),
        );
        Self::with_chain(config, store, Arc::new(chain))
    }

    /// Creates a RelayerContext on top of an existing chain client.
    pub fn with_chain(
        config: OmbuRelayerConfig,
        store: Arc<dyn MembershipStore>,
        chain: Arc<dyn MembershipChain>,
    ) -> ombu_relayer_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Mutex::new(Metrics::new()?));
        let cache = Arc::new(MembershipCache::in_memory(config.cache.max_groups));
        let reader = ChainLogReader::new(
            chain.clone(),
            scan_policy(&config),
            metrics.clone(),
        );
        let assembler = GroupStateAssembler::new(
            chain.clone(),
            store.clone(),
            cache.clone(),
            reader.clone(),
            metrics.clone(),
        );
        let coordinator = MembershipCoordinator::builder()
            .chain(chain.clone())
            .store(store.clone())
            .cache(cache.clone())
            .reader(reader)
            .metrics(metrics.clone())
            .receipt_timeout(Duration::from_millis(config.chain.receipt_timeout))
            .explorer(config.chain.explorer.clone())
            .max_retry_count(config.log_reader.max_retry_count)
            .build();
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
            store,
            cache,
            chain,
            assembler,
            coordinator,
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// The persistent membership store.
    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    /// The volatile membership cache.
    pub fn cache(&self) -> &Arc<MembershipCache> {
        &self.cache
    }

    /// The chain client.
    pub fn chain(&self) -> &Arc<dyn MembershipChain> {
        &self.chain
    }

    /// Assembles ordered member lists and answers membership checks.
    pub fn assembler(&self) -> &GroupStateAssembler {
        &self.assembler
    }

    /// Runs joins and votes.
    pub fn coordinator(&self) -> &MembershipCoordinator {
        &self.coordinator
    }
}

/// The log scanning policy of the configured chain.
pub fn scan_policy(config: &OmbuRelayerConfig) -> ScanPolicy {
    let log_reader = &config.log_reader;
    let mut policy = ScanPolicy::builder()
        .max_blocks_per_step(log_reader.max_blocks_per_step)
        .min_blocks_per_step(log_reader.min_blocks_per_step)
        .lookback_blocks(log_reader.lookback_blocks)
        .max_retry_count(log_reader.max_retry_count)
        .build();
    policy.deployed_at = config.contracts.semaphore.deployed_at;
    policy
}

/// An HTTP provider behind the rate-limit aware retry layer.
fn evm_provider(
    config: &OmbuRelayerConfig,
) -> ombu_relayer_utils::Result<EthersClient> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.chain.rpc_timeout))
        .build()
        .map_err(|e| ombu_relayer_utils::Error::Configuration {
            reason: format!("failed to build the http client: {e}"),
        })?;
    let http = Http::new_with_client(
        config.chain.http_endpoint.as_url().clone(),
        client,
    );
    let retry_client = RetryClientBuilder::default()
        .rate_limit_retries(5)
        .timeout_retries(3)
        .initial_backoff(Duration::from_millis(500))
        .build(http, OmbuHttpRetryPolicy::boxed());
    Ok(Provider::new(retry_client)
        .interval(Duration::from_millis(config.chain.receipt_poll_interval)))
}

/// The relayer signing wallet, bound to the configured chain id.
fn evm_wallet(
    config: &OmbuRelayerConfig,
) -> ombu_relayer_utils::Result<LocalWallet> {
    let private_key = config
        .chain
        .private_key
        .as_ref()
        .ok_or(ombu_relayer_utils::Error::MissingSecrets)?;
    let wallet = LocalWallet::from_bytes(private_key.as_bytes())?
        .with_chain_id(config.chain.chain_id);
    Ok(wallet)
}

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the server
/// should shutdown.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,
    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use ombu_membership_chain::MockedMembershipChain;
    use ombu_relayer_store::InMemoryStore;

    use super::*;

    fn config(extra: &str) -> OmbuRelayerConfig {
        serde_json::from_str(&format!(
            r#"{{ "chain": {{ "http-endpoint": "http://localhost:8545"{extra} }} }}"#
        ))
        .unwrap()
    }

    #[test]
    fn scan_policy_follows_the_config() {
        let mut config = config("");
        config.log_reader.max_blocks_per_step = 2_000;
        config.contracts.semaphore.deployed_at = Some(77);
        let policy = scan_policy(&config);
        assert_eq!(policy.max_blocks_per_step, 2_000);
        assert_eq!(policy.min_blocks_per_step, 1);
        assert_eq!(policy.deployed_at, Some(77));
    }

    #[test]
    fn connecting_without_a_private_key_fails() {
        let result =
            RelayerContext::new(config(""), Arc::new(InMemoryStore::default()));
        assert!(matches!(
            result.err(),
            Some(ombu_relayer_utils::Error::MissingSecrets)
        ));
    }

    #[test]
    fn wallet_is_bound_to_the_chain_id() {
        let config = config(
            r#", "private-key": "0x000000000000000000000000000000000000000000000000000000000000c0de""#,
        );
        let wallet = evm_wallet(&config).unwrap();
        assert_eq!(wallet.chain_id(), 421_614);
    }

    #[tokio::test]
    async fn shutdown_reaches_every_subscriber() {
        let ctx = RelayerContext::with_chain(
            config(""),
            Arc::new(InMemoryStore::default()),
            Arc::new(MockedMembershipChain::default()),
        )
        .unwrap();
        let mut first = ctx.shutdown_signal();
        let mut second = ctx.shutdown_signal();
        ctx.shutdown();
        first.recv().await;
        second.recv().await;
        // a received shutdown stays received
        first.recv().await;
    }
}
