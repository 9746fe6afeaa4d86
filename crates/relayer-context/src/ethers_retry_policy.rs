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

use std::time::Duration;

use ethers::providers::{HttpClientError, JsonRpcError, RetryPolicy};
use once_cell::sync::Lazy;

// Last resort for providers that answer a rate limit with free text.
static RATE_LIMITED: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"(?mixU)\b(?:rate|limit|429|Too \s Many \s Requests)\b")
        .expect("Valid Regex")
});

/// Retries requests that were rate limited (HTTP 429 and its JSON-RPC
/// spellings) or hit a flaky load balancer (`header not found`).
///
/// Anything else, block range refusals included, is returned to the caller
/// untouched so the chain log reader can narrow its window.
#[derive(Debug, Default)]
pub struct OmbuHttpRetryPolicy;

impl OmbuHttpRetryPolicy {
    /// Boxed, as [`ethers::providers::RetryClientBuilder::build`] wants it.
    pub fn boxed() -> Box<Self> {
        Box::new(Self)
    }
}

fn should_retry_json_rpc_error(err: &JsonRpcError) -> bool {
    let JsonRpcError { code, message, .. } = err;
    match code {
        // alchemy
        429 => return true,
        // infura `exceeded project rate limit`
        -32005 => return true,
        -32016 if message.contains("rate limit") => return true,
        _ => {}
    }
    matches!(
        message.as_str(),
        "header not found"
            | "daily request count exceeded, request rate limited"
    )
}

// some providers send invalid JSON RPC in the error case, but the text
// usually still carries the error
fn should_retry_text(text: &str) -> bool {
    #[derive(serde::Deserialize)]
    struct Resp {
        error: JsonRpcError,
    }
    if let Ok(resp) = serde_json::from_str::<Resp>(text) {
        return should_retry_json_rpc_error(&resp.error);
    }
    let text = text.to_lowercase();
    let should_retry = RATE_LIMITED.is_match(&text)
        || text == "expected value at line 1 column 1";
    tracing::event!(
        target: ombu_relayer_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %ombu_relayer_utils::probe::Kind::Retry,
        should_retry = should_retry,
        error = %text,
    );
    should_retry
}

impl RetryPolicy<HttpClientError> for OmbuHttpRetryPolicy {
    fn should_retry(&self, error: &HttpClientError) -> bool {
        tracing::debug!("should_retry: {:?}", error);
        match error {
            HttpClientError::ReqwestError(err) => {
                err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
            }
            HttpClientError::JsonRpcError(err) => {
                should_retry_json_rpc_error(err)
            }
            HttpClientError::SerdeJson { text, .. } => should_retry_text(text),
        }
    }

    fn backoff_hint(&self, error: &HttpClientError) -> Option<Duration> {
        const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);
        // infura sends the requested backoff along with a daily limit error
        let hinted = match error {
            HttpClientError::JsonRpcError(err) => err
                .data
                .as_ref()
                .and_then(|data| data.get("rate"))
                .and_then(|rate| rate.get("backoff_seconds"))
                .and_then(|seconds| {
                    seconds.as_u64().map(Duration::from_secs).or_else(|| {
                        seconds
                            .as_f64()
                            .map(|s| Duration::from_secs(s as u64 + 1))
                    })
                }),
            _ => None,
        };
        Some(hinted.unwrap_or(DEFAULT_BACKOFF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i64, message: &str) -> HttpClientError {
        HttpClientError::JsonRpcError(JsonRpcError {
            code,
            message: message.to_string(),
            data: None,
        })
    }

    #[test]
    fn retries_rate_limits() {
        let policy = OmbuHttpRetryPolicy;
        assert!(policy.should_retry(&rpc_error(429, "slow down")));
        assert!(policy.should_retry(&rpc_error(-32005, "project limit")));
        assert!(policy.should_retry(&rpc_error(-32000, "header not found")));
    }

    #[test]
    fn leaves_range_refusals_to_the_caller() {
        let policy = OmbuHttpRetryPolicy;
        assert!(!policy.should_retry(&rpc_error(
            -32602,
            "query exceeds max block range 10000"
        )));
        assert!(!policy.should_retry(&rpc_error(3, "execution reverted")));
    }

    #[test]
    fn retries_free_text_rate_limits() {
        assert!(should_retry_text("429 Too Many Requests"));
        assert!(!should_retry_text("<html>bad gateway</html>"));
    }

    #[test]
    fn honours_the_backoff_hint() {
        let policy = OmbuHttpRetryPolicy;
        let error = HttpClientError::JsonRpcError(JsonRpcError {
            code: -32005,
            message: "daily request count exceeded, request rate limited"
                .to_string(),
            data: Some(serde_json::json!({ "rate": { "backoff_seconds": 30 } })),
        });
        assert_eq!(policy.backoff_hint(&error), Some(Duration::from_secs(30)));
        assert_eq!(
            policy.backoff_hint(&rpc_error(429, "slow down")),
            Some(Duration::from_secs(5))
        );
    }
}
