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
use std::time::Duration;

use ethers::contract::ContractError;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{
    Http, Middleware, PendingTransaction, Provider, ProviderError,
    RetryClient, RpcError,
};
use ethers::signers::LocalWallet;
use ethers::types::{Address, BigEndianHash, Filter, Log, TransactionReceipt, H256, U256};
use once_cell::sync::Lazy;
use regex::Regex;

use ombu_relayer_types::AccumulatorState;
use ombu_relayer_utils::{Error, Result, RevertReason};

use crate::contracts::{OmbuContract, SemaphoreContract};
use crate::{LogQuery, MembershipChain, VoteCall};

/// Read-only client: an HTTP provider behind a rate-limit aware retry layer.
pub type EthersClient = Provider<RetryClient<Http>>;
/// The signing client used to send transactions.
pub type SignerClient = SignerMiddleware<Arc<EthersClient>, LocalWallet>;

// Wording used by the common providers when `eth_getLogs` covers too many
// blocks or returns too many entries.
static RANGE_TOO_LARGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(block range|range (is )?too (large|wide)|exceed\w* .*(range|limit)|more than \d+ (results|logs)|too many (results|logs)|response size|limited to .*range)",
    )
    .expect("Valid Regex")
});

/// Maps the text of a failed call to the error taxonomy.
pub fn classify_message(message: String) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        Error::InsufficientFunds
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Error::ChainTimeout(message)
    } else {
        Error::ContractCall(message)
    }
}

/// Classifies a provider error, decoding revert data when present.
pub fn classify_provider_error(error: ProviderError) -> Error {
    if let Some(data) = error
        .as_error_response()
        .and_then(|response| response.as_revert_data())
    {
        return Error::ContractCallReverted {
            reason: RevertReason::decode(&data),
        };
    }
    match classify_message(error.to_string()) {
        Error::ContractCall(_) => Error::EthersProvider(error),
        other => other,
    }
}

/// Classifies a failed `eth_getLogs`, recognizing block range refusals.
pub fn classify_log_error(error: ProviderError, query: &LogQuery) -> Error {
    if RANGE_TOO_LARGE.is_match(&error.to_string()) {
        return Error::RangeTooLarge {
            from: query.from_block,
            to: query.to_block + 1,
        };
    }
    classify_provider_error(error)
}

/// Classifies a failed contract call or transaction.
pub fn classify_contract_error<M: Middleware>(
    error: ContractError<M>,
) -> Error {
    if let Some(data) = error.as_revert() {
        return Error::ContractCallReverted {
            reason: RevertReason::decode(data),
        };
    }
    classify_message(error.to_string())
}

/// A [`MembershipChain`] backed by a JSON-RPC node.
pub struct EthersMembershipChain {
    provider: Arc<EthersClient>,
    client: Arc<SignerClient>,
    semaphore: SemaphoreContract<EthersClient>,
    ombu_reader: OmbuContract<EthersClient>,
    ombu_writer: OmbuContract<SignerClient>,
    receipt_poll_interval: Duration,
}

impl EthersMembershipChain {
    /// Creates the chain client.
    ///
    /// # Arguments
    ///
    /// * `provider` - read client, see [`EthersClient`]
    /// * `wallet` - relayer signing key, already bound to the chain id
    /// * `semaphore` - Semaphore contract address
    /// * `ombu` - Ombu contract address
    /// * `receipt_poll_interval` - how often a pending transaction is polled
    pub fn new(
        provider: Arc<EthersClient>,
        wallet: LocalWallet,
        semaphore: Address,
        ombu: Address,
        receipt_poll_interval: Duration,
    ) -> Self {
        let client = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        Self {
            semaphore: SemaphoreContract::new(semaphore, provider.clone()),
            ombu_reader: OmbuContract::new(ombu, provider.clone()),
            ombu_writer: OmbuContract::new(ombu, client.clone()),
            provider,
            client,
            receipt_poll_interval,
        }
    }

    fn missing_group(error: Error, group_id: U256) -> Error {
        match error {
            Error::ContractCallReverted { ref reason }
                if reason.is_missing_group() =>
            {
                Error::GroupNotFound { group_id }
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl MembershipChain for EthersMembershipChain {
    fn semaphore_address(&self) -> Address {
        self.semaphore.address()
    }

    fn ombu_address(&self) -> Address {
        self.ombu_reader.address()
    }

    async fn latest_block_number(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_number()
            .await
            .map_err(classify_provider_error)?;
        Ok(block.as_u64())
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>> {
        let block = self
            .provider
            .get_block(block)
            .await
            .map_err(classify_provider_error)?;
        Ok(block.map(|b| b.timestamp.low_u64()))
    }

    async fn relayer_balance(&self) -> Result<U256> {
        self.provider
            .get_balance(self.client.address(), None)
            .await
            .map_err(classify_provider_error)
    }

    async fn group_counter(&self) -> Result<U256> {
        self.ombu_reader
            .group_counter()
            .call()
            .await
            .map_err(classify_contract_error)
    }

    async fn group_at(&self, index: U256) -> Result<U256> {
        self.ombu_reader
            .groups(index)
            .call()
            .await
            .map_err(classify_contract_error)
    }

    async fn group_name(&self, group_id: U256) -> Result<String> {
        self.ombu_reader
            .group_names(group_id)
            .call()
            .await
            .map_err(classify_contract_error)
    }

    #[tracing::instrument(skip(self))]
    async fn accumulator(&self, group_id: U256) -> Result<AccumulatorState> {
        let root = self.semaphore.get_merkle_tree_root(group_id);
        let depth = self.semaphore.get_merkle_tree_depth(group_id);
        let size = self.semaphore.get_merkle_tree_size(group_id);
        let (root, depth, size) =
            futures::try_join!(root.call(), depth.call(), size.call())
                .map_err(classify_contract_error)
                .map_err(|e| Self::missing_group(e, group_id))?;
        Ok(AccumulatorState {
            root,
            depth: depth.low_u64(),
            size: size.low_u64(),
        })
    }

    async fn is_member(&self, group_id: U256, commitment: U256) -> Result<bool> {
        self.ombu_reader
            .is_group_member(group_id, commitment)
            .call()
            .await
            .map_err(classify_contract_error)
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(query.address)
            .topic0(query.signature)
            .topic1(H256::from_uint(&query.group_id))
            .from_block(query.from_block)
            .to_block(query.to_block);
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| classify_log_error(e, query))
    }

    #[tracing::instrument(skip(self))]
    async fn submit_add_member(
        &self,
        group_id: U256,
        commitment: U256,
    ) -> Result<H256> {
        let call = self.ombu_writer.add_member(group_id, commitment);
        let pending = call
            .send()
            .await
            .map_err(classify_contract_error)
            .map_err(|e| Self::missing_group(e, group_id))?;
        Ok(pending.tx_hash())
    }

    #[tracing::instrument(skip(self))]
    async fn submit_vote(&self, vote: VoteCall) -> Result<H256> {
        let call = self.ombu_writer.vote_on_post(
            vote.group_id,
            vote.post_id,
            vote.is_upvote,
            vote.commitment,
        );
        let pending = call.send().await.map_err(classify_contract_error)?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>> {
        PendingTransaction::new(tx_hash, self.provider.as_ref())
            .interval(self.receipt_poll_interval)
            .await
            .map_err(classify_provider_error)
    }
}
