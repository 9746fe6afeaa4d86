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

//! Ombu Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use tokio::signal::unix;

use ombu_relayer::service;
use ombu_relayer_config::cli::{create_store, load_config, setup_logger, Opts};
use ombu_relayer_context::RelayerContext;
use ombu_relayer_utils::probe;

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;
    // refuse to start without a signing key, every write endpoint needs it
    config.verify()?;

    // persistent storage for the relayer
    let store = create_store(&args)?;

    // The RelayerContext takes a configuration, and populates objects that are needed
    // throughout the lifetime of the relayer. Items such as the chain client, the
    // membership store and cache, and the coordinator of joins and votes.
    let ctx = RelayerContext::new(config, Arc::new(store.clone()))?;

    let server_handle = tokio::spawn(service::build_web_services(ctx.clone()));
    // start all background services.
    // this does not block, will fire the services on background tasks.
    service::ignite(&ctx, store);
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true
    );
    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let shutdown = || {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            shutdown = true
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
    };
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown();
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown();
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
            shutdown();
        },
    }
    // let in-flight requests finish, a submitted transaction is never undone
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(%e, "Server stopped with an error"),
        Err(e) => tracing::error!(%e, "Server task failed"),
    }
    tracing::info!("Clean Exit ..");
    Ok(())
}
