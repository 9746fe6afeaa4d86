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

use prometheus::core::{AtomicF64, GenericCounter, GenericGauge};
use prometheus::{Encoder, Opts, Registry, TextEncoder};

/// A struct definition for collecting metrics in the relayer.
///
/// Every instance owns its registry, so independent relayer contexts do not
/// fight over the process wide default registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Join transactions submitted on chain.
    pub joins_submitted: GenericCounter<AtomicF64>,
    /// Join requests answered with "already a member".
    pub joins_already_member: GenericCounter<AtomicF64>,
    /// Vote transactions submitted on chain.
    pub votes_submitted: GenericCounter<AtomicF64>,
    /// Off-chain bookkeeping failures after a confirmed join.
    pub membership_store_write_failures: GenericCounter<AtomicF64>,
    /// Assembled membership lists rejected by the root check.
    pub group_state_inconsistent: GenericCounter<AtomicF64>,
    /// How many times a log query window had to be narrowed.
    pub log_reader_range_narrowed: GenericCounter<AtomicF64>,
    /// Balance (in wei) of the relayer account, as last observed.
    pub relayer_balance_wei: GenericGauge<AtomicF64>,
    /// Total amount of data stored metric
    pub total_amount_of_data_stored: GenericGauge<AtomicF64>,
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<GenericCounter<AtomicF64>, prometheus::Error> {
    let counter = GenericCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<GenericGauge<AtomicF64>, prometheus::Error> {
    let gauge = GenericGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a registry for the counters and
    /// registers the counters
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ombu".to_string()), None)?;
        Ok(Self {
            joins_submitted: counter(
                &registry,
                "joins_submitted",
                "The total number of join transactions submitted",
            )?,
            joins_already_member: counter(
                &registry,
                "joins_already_member",
                "The total number of joins short-circuited as already a member",
            )?,
            votes_submitted: counter(
                &registry,
                "votes_submitted",
                "The total number of vote transactions submitted",
            )?,
            membership_store_write_failures: counter(
                &registry,
                "membership_store_write_failures",
                "Membership records that could not be persisted after a confirmed join",
            )?,
            group_state_inconsistent: counter(
                &registry,
                "group_state_inconsistent",
                "Assembled membership lists whose root did not match the chain",
            )?,
            log_reader_range_narrowed: counter(
                &registry,
                "log_reader_range_narrowed",
                "How many times a log query window was narrowed",
            )?,
            relayer_balance_wei: gauge(
                &registry,
                "relayer_balance_wei",
                "Balance of the relayer account in wei",
            )?,
            total_amount_of_data_stored: gauge(
                &registry,
                "total_amount_of_data_stored",
                "Total amount of data stored on disk, in bytes",
            )?,
            registry,
        })
    }

    /// Gathers the whole metric set in the prometheus text format.
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
