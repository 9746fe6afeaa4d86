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

use std::path::{Path, PathBuf};

use config::{Config, File};

use crate::OmbuRelayerConfig;

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> ombu_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(ombu_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`OmbuRelayerConfig`] from the given config file(s).
///
/// Later files override earlier ones, and `OMBU_*` environment variables
/// override every file (`OMBU_PORT=8080`).
pub fn parse_from_files(
    files: &[PathBuf],
) -> ombu_relayer_utils::Result<OmbuRelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of OMBU).
    let builder = builder
        .add_source(config::Environment::with_prefix("OMBU").separator("_"));
    let cfg = builder.build()?;
    let config: Result<
        OmbuRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files and
///
/// Returns `Ok(OmbuRelayerConfig)` on success, or `Err(ombu_relayer_utils::Error)` on failure.
///
/// # Arguments
///
/// * `path` - The path to the configuration directory
///
/// # Example
///
/// ```
/// use ombu_relayer_config::utils::load;
///
/// let path = "/path/to/config";
/// load(path);
/// ```
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> ombu_relayer_utils::Result<OmbuRelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: OmbuRelayerConfig,
) -> ombu_relayer_utils::Result<OmbuRelayerConfig> {
    tracing::trace!("Checking configration sanity ...");
    config.chain.name = config.chain.name.to_lowercase();

    let log_reader = &config.log_reader;
    if log_reader.min_blocks_per_step == 0 {
        return Err(invalid("log-reader.min-blocks-per-step must be at least 1"));
    }
    if log_reader.min_blocks_per_step > log_reader.max_blocks_per_step {
        return Err(invalid(
            "log-reader.min-blocks-per-step must not exceed log-reader.max-blocks-per-step",
        ));
    }
    if config.cache.max_groups == 0 {
        return Err(invalid("cache.max-groups must be at least 1"));
    }
    if config.chain.receipt_timeout == 0 || config.chain.rpc_timeout == 0 {
        return Err(invalid("chain timeouts must be greater than zero"));
    }
    if config.contracts.semaphore.deployed_at.is_none() {
        tracing::warn!(
            lookback = config.log_reader.lookback_blocks,
            "!!WARNING!!: contracts.semaphore.deployed-at is not set, \
             chain log scans will only look back a fixed number of blocks"
        );
    }

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );
    Ok(config)
}

fn invalid(reason: &str) -> ombu_relayer_utils::Error {
    ombu_relayer_utils::Error::Configuration {
        reason: reason.to_string(),
    }
}
