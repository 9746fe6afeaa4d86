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

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! The relayer reads every `*.toml` and `*.json` file of its config
//! directory, merges them, then layers `OMBU_*` environment variables on
//! top. Secrets (`private-key`, `http-endpoint`) can be written as
//! `$ENV_VAR` so they never have to live in a file.
#![warn(missing_docs)]

/// CLI options, config discovery and logger setup.
#[cfg(feature = "cli")]
pub mod cli;
/// Config file discovery and parsing.
pub mod utils;

use ethers::types::{Address, H160, U256};
use serde::{Deserialize, Serialize};

use ombu_relayer_types::{
    private_key::PrivateKey, rpc_url::RpcUrl, serde_decimal,
};

const fn default_port() -> u16 {
    3001
}
fn default_chain_name() -> String {
    String::from("arbitrum-sepolia")
}
const fn default_chain_id() -> u64 {
    421_614
}
const fn default_rpc_timeout() -> u64 {
    30_000
}
const fn default_receipt_timeout() -> u64 {
    120_000
}
const fn default_receipt_poll_interval() -> u64 {
    1_000
}
/// The Semaphore deployment on Arbitrum Sepolia.
const fn default_semaphore_address() -> Address {
    H160([
        0x8a, 0x1f, 0xd1, 0x99, 0x51, 0x64, 0x89, 0xb0, 0xfb, 0x71, 0x53,
        0xeb, 0x5f, 0x07, 0x5c, 0xda, 0xc8, 0x3c, 0x69, 0x3d,
    ])
}
/// The Ombu deployment on Arbitrum Sepolia.
const fn default_ombu_address() -> Address {
    H160([
        0x38, 0xf1, 0x97, 0x94, 0x40, 0x19, 0x06, 0x18, 0x31, 0xce, 0xea,
        0x48, 0x89, 0x98, 0x40, 0xf0, 0x5b, 0xdd, 0x08, 0x12,
    ])
}
const fn max_blocks_per_step_default() -> u64 {
    10_000
}
const fn min_blocks_per_step_default() -> u64 {
    1
}
const fn lookback_blocks_default() -> u64 {
    50_000
}
const fn max_retry_count_default() -> usize {
    3
}
const fn max_groups_default() -> usize {
    1024
}
const fn enabled_default() -> bool {
    true
}

/// OmbuRelayerConfig is the configuration for the Ombu relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OmbuRelayerConfig {
    /// HTTP server port.
    ///
    /// default to 3001
    #[serde(default = "default_port", skip_serializing)]
    pub port: u16,
    /// The chain the Semaphore and Ombu contracts live on.
    pub chain: ChainConfig,
    /// Contract addresses.
    #[serde(default)]
    pub contracts: ContractsConfig,
    /// How `MemberAdded` logs are read.
    #[serde(default, rename(serialize = "logReader"))]
    pub log_reader: LogReaderConfig,
    /// The volatile membership cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Optional features.
    #[serde(default)]
    pub features: FeaturesConfig,
    /// The group warmed up at startup, the latest Ombu group when absent.
    #[serde(
        default,
        with = "serde_decimal::option",
        rename(serialize = "defaultGroupId")
    )]
    pub default_group_id: Option<U256>,
}

impl OmbuRelayerConfig {
    /// Makes sure that the config is usable for relaying.
    ///
    /// Every endpoint of the relayer that writes to the chain needs the
    /// signing key, so a config without one is rejected at startup.
    pub fn verify(&self) -> ombu_relayer_utils::Result<()> {
        self.chain
            .private_key
            .is_some()
            .then_some(())
            .ok_or(ombu_relayer_utils::Error::MissingSecrets)
    }
}

/// ChainConfig is the configuration of the EVM chain the relayer talks to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// String that groups configuration for this chain on a human-readable name.
    #[serde(default = "default_chain_name")]
    pub name: String,
    /// chain specific id (output of chainId opcode on EVM networks)
    #[serde(default = "default_chain_id", rename(serialize = "chainId"))]
    pub chain_id: u64,
    /// Http(s) Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// Block Explorer for this chain.
    ///
    /// Optional, and only used for printing a clickable links
    /// for transactions.
    #[serde(skip_serializing)]
    pub explorer: Option<url::Url>,
    /// The Private Key of the relayer account on this network
    /// the format is more dynamic here:
    /// 1. if it starts with '0x' then this would be raw (64 bytes) hex encoded
    ///    private key.
    ///    Example: 0x8917174396171783496173419137618235192359106130478137647163400318
    ///
    /// 2. if it starts with '$' then it would be considered as an Enviroment variable
    ///    of a hex-encoded private key.
    ///   Example: $ARBITRUM_SEPOLIA_PRIVATE_KEY
    #[serde(default, skip_serializing)]
    pub private_key: Option<PrivateKey>,
    /// Timeout of a single RPC request, in milliseconds.
    #[serde(default = "default_rpc_timeout", rename(serialize = "rpcTimeout"))]
    pub rpc_timeout: u64,
    /// How long a transaction receipt is awaited, in milliseconds.
    #[serde(
        default = "default_receipt_timeout",
        rename(serialize = "receiptTimeout")
    )]
    pub receipt_timeout: u64,
    /// How often a pending transaction is polled, in milliseconds.
    #[serde(
        default = "default_receipt_poll_interval",
        rename(serialize = "receiptPollInterval")
    )]
    pub receipt_poll_interval: u64,
}

/// Addresses of the contracts used by the relayer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractsConfig {
    /// The Semaphore contract, owner of the group trees.
    #[serde(default)]
    pub semaphore: SemaphoreContractConfig,
    /// The Ombu contract, the only writer of the groups.
    #[serde(default)]
    pub ombu: OmbuContractConfig,
}

/// The Semaphore contract.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SemaphoreContractConfig {
    /// The address of this contract on this chain.
    #[serde(default = "default_semaphore_address")]
    pub address: Address,
    /// the block number where this contract got deployed at.
    #[serde(default, rename(serialize = "deployedAt"))]
    pub deployed_at: Option<u64>,
}

impl Default for SemaphoreContractConfig {
    fn default() -> Self {
        Self {
            address: default_semaphore_address(),
            deployed_at: None,
        }
    }
}

/// The Ombu contract.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OmbuContractConfig {
    /// The address of this contract on this chain.
    #[serde(default = "default_ombu_address")]
    pub address: Address,
}

impl Default for OmbuContractConfig {
    fn default() -> Self {
        Self {
            address: default_ombu_address(),
        }
    }
}

/// LogReaderConfig is the configuration for reading `MemberAdded` logs.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogReaderConfig {
    /// Widest block window asked from the provider at once.
    #[serde(
        default = "max_blocks_per_step_default",
        rename(serialize = "maxBlocksPerStep")
    )]
    pub max_blocks_per_step: u64,
    /// Narrowest window the reader halves down to.
    #[serde(
        default = "min_blocks_per_step_default",
        rename(serialize = "minBlocksPerStep")
    )]
    pub min_blocks_per_step: u64,
    /// Blocks scanned back from the head when `deployed-at` is unknown.
    #[serde(
        default = "lookback_blocks_default",
        rename(serialize = "lookbackBlocks")
    )]
    pub lookback_blocks: u64,
    /// Retries of a transient RPC failure.
    #[serde(
        default = "max_retry_count_default",
        rename(serialize = "maxRetryCount")
    )]
    pub max_retry_count: usize,
}

impl Default for LogReaderConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_step: max_blocks_per_step_default(),
            min_blocks_per_step: min_blocks_per_step_default(),
            lookback_blocks: lookback_blocks_default(),
            max_retry_count: max_retry_count_default(),
        }
    }
}

/// CacheConfig bounds the volatile membership cache.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Maximum number of cached groups.
    #[serde(default = "max_groups_default", rename(serialize = "maxGroups"))]
    pub max_groups: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_groups: max_groups_default(),
        }
    }
}

/// FeaturesConfig toggles optional behavior.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeaturesConfig {
    /// Assemble the default group once at startup.
    #[serde(default = "enabled_default", rename(serialize = "warmCache"))]
    pub warm_cache: bool,
    /// Serve the `/admin` endpoints.
    #[serde(default = "enabled_default", rename(serialize = "adminApi"))]
    pub admin_api: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            warm_cache: true,
            admin_api: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn shipped_config_dir() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    #[test]
    fn all_config_files_are_correct() {
        // every directory under `config/` must parse with its example env
        let config_dir = shipped_config_dir();
        let config_dirs = std::fs::read_dir(&config_dir)
            .expect("Failed to read config directory")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_dir())
            .collect::<Vec<_>>();
        assert!(
            !config_dirs.is_empty(),
            "No config directories found in the config directory"
        );
        for config_subdir in config_dirs {
            let _ = dotenv::from_path(config_subdir.join(".env.example"));
            let config = match utils::load(&config_subdir) {
                Ok(config) => config,
                Err(e) => panic!(
                    "Failed to parse config file in directory: {config_subdir:?} with error: {e}"
                ),
            };
            assert!(config.verify().is_ok());
        }
    }

    #[test]
    fn shipped_config_has_expected_values() {
        let dir = shipped_config_dir().join("arbitrum-sepolia");
        let _ = dotenv::from_path(dir.join(".env.example"));
        let config = utils::load(&dir).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.chain.chain_id, 421_614);
        assert_eq!(config.contracts.semaphore.address, default_semaphore_address());
        assert_eq!(config.contracts.ombu.address, default_ombu_address());
        assert_eq!(config.log_reader.max_blocks_per_step, 10_000);
        assert!(config.features.admin_api);
        assert_eq!(
            config.chain.explorer.as_ref().map(|u| u.as_str()),
            Some("https://sepolia.arbiscan.io/")
        );
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: OmbuRelayerConfig = serde_json::from_str(
            r#"{ "chain": { "http-endpoint": "http://localhost:8545" } }"#,
        )
        .unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.chain.name, "arbitrum-sepolia");
        assert_eq!(config.chain.rpc_timeout, 30_000);
        assert_eq!(config.chain.receipt_timeout, 120_000);
        assert_eq!(config.log_reader.min_blocks_per_step, 1);
        assert_eq!(config.log_reader.lookback_blocks, 50_000);
        assert_eq!(config.log_reader.max_retry_count, 3);
        assert_eq!(config.cache.max_groups, 1024);
        assert!(config.features.warm_cache);
        assert_eq!(config.default_group_id, None);
        assert_eq!(
            format!("{:?}", config.contracts.semaphore.address),
            "0x8a1fd199516489b0fb7153eb5f075cdac83c693d"
        );
        assert_eq!(
            format!("{:?}", config.contracts.ombu.address),
            "0x38f197944019061831ceea48899840f05bdd0812"
        );
    }

    #[test]
    fn config_without_private_key_cannot_relay() {
        let config: OmbuRelayerConfig = serde_json::from_str(
            r#"{ "chain": { "http-endpoint": "http://localhost:8545" } }"#,
        )
        .unwrap();
        assert!(matches!(
            config.verify(),
            Err(ombu_relayer_utils::Error::MissingSecrets)
        ));
    }

    #[test]
    fn secrets_are_not_serialized() {
        let config: OmbuRelayerConfig = serde_json::from_str(
            r#"{
                "chain": {
                    "http-endpoint": "http://localhost:8545/?key=secret",
                    "private-key": "0x000000000000000000000000000000000000000000000000000000000000c0de"
                },
                "default-group-id": 7
            }"#,
        )
        .unwrap();
        assert!(config.verify().is_ok());
        assert_eq!(config.default_group_id, Some(U256::from(7)));
        let dump = serde_json::to_string(&config).unwrap();
        assert!(!dump.contains("secret"));
        assert!(!dump.contains("c0de"));
        assert!(dump.contains("\"chainId\":421614"));
        assert!(dump.contains("\"defaultGroupId\":\"7\""));
    }
}
