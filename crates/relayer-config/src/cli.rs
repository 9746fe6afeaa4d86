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

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;

use crate::OmbuRelayerConfig;

/// Package identifier, where the default configuration & database are defined.
/// If the user does not start the relayer with the `--config-dir`
/// it will default to read from the default location depending on the OS.
pub const PACKAGE_ID: [&str; 3] = ["tools", "ombu", "ombu-relayer"];

/// The Ombu relayer command-line tool
///
/// Start the relayer from a config directory:
///
/// $ ombu-relayer -vvv -c <CONFIG_DIR_PATH>
#[derive(StructOpt)]
#[structopt(name = "Ombu Relayer")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory that contains configration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Create the Database Store in a temporary directory.
    /// and will be deleted when the process exits.
    #[structopt(long)]
    pub tmp: bool,
}

/// Loads the configuration from the given directory.
///
/// Falls back to the OS specific config directory of [`PACKAGE_ID`] when
/// no directory is given.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<OmbuRelayerConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    tracing::debug!("Getting default dirs for ombu relayer");
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => {
            ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
                .context("failed to get config")?
                .config_dir()
                .to_path_buf()
        }
    };
    // return an error if the path is not a directory.
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading Config from {} ..", path.display());
    let v = crate::utils::load(path)?;
    tracing::trace!("Config loaded..");
    Ok(v)
}

/// Sets up the logger for the relayer, based on the verbosity level passed in.
///
/// The directive covers every `ombu_*` target, probes included.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directive = format!("ombu={log_level}")
        .parse()
        .context("invalid log directive")?;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    // if we are not compiling for integration tests, we should use pretty logs
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // otherwise, we should use json, which is easy to parse.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger.init();
    Ok(())
}

/// Opens the persistent membership store.
///
/// With `--tmp` the store lives in a temporary directory. Otherwise it sits
/// next to the config directory, or in the OS data directory.
pub fn create_store(
    opts: &Opts,
) -> anyhow::Result<ombu_relayer_store::SledStore> {
    // check if we shall use the temp dir.
    if opts.tmp {
        tracing::debug!("Using temp dir for store");
        let store = ombu_relayer_store::SledStore::temporary()?;
        return Ok(store);
    }
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")?;
    let db_path = store_path(opts.config_dir.as_deref(), dirs.data_local_dir());
    tracing::debug!("Opening store at {}", db_path.display());
    let store = ombu_relayer_store::SledStore::open(db_path)?;
    Ok(store)
}

fn store_path(config_dir: Option<&Path>, data_dir: &Path) -> PathBuf {
    match config_dir.and_then(Path::parent) {
        Some(parent) => parent.join("store"),
        None => data_dir.join("store"),
    }
}

#[cfg(test)]
mod tests {
    use ombu_relayer_store::MembershipStore;

    use super::*;

    #[test]
    fn parses_the_command_line() {
        let opts = Opts::from_iter([
            "ombu-relayer",
            "-vvv",
            "-c",
            "config/arbitrum-sepolia",
            "--tmp",
        ]);
        assert_eq!(opts.verbose, 3);
        assert_eq!(
            opts.config_dir.as_deref(),
            Some(Path::new("config/arbitrum-sepolia"))
        );
        assert!(opts.tmp);
    }

    #[test]
    fn store_sits_next_to_the_config_dir() {
        let data = Path::new("/var/lib/ombu");
        assert_eq!(
            store_path(Some(Path::new("/etc/ombu/config")), data),
            PathBuf::from("/etc/ombu/store")
        );
        assert_eq!(store_path(None, data), PathBuf::from("/var/lib/ombu/store"));
    }

    #[test]
    fn missing_config_dir_is_an_error() {
        let err = load_config(Some("/definitely/not/here")).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }

    #[test]
    fn temporary_store_is_usable() {
        let opts = Opts::from_iter(["ombu-relayer", "--tmp"]);
        let store = create_store(&opts).unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }
}
