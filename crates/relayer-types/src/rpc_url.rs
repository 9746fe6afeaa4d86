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

use serde::{Deserialize, Serialize, Serializer};

/// An RPC endpoint url.
///
/// Deserializes from a literal url, or from `$VAR` naming an environment
/// variable that holds one, so provider api keys can stay out of config files.
#[derive(Clone)]
pub struct RpcUrl(url::Url);

impl RpcUrl {
    /// Returns the inner [`url::Url`].
    pub fn as_url(&self) -> &url::Url {
        &self.0
    }
}

impl std::fmt::Display for RpcUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the query usually carries the provider api key, keep it out of logs
        let scheme = self.0.scheme();
        write!(f, "{scheme}")?;
        if let Some(host) = self.0.host_str() {
            write!(f, "://{host}")?;
        }
        if let Some(port) = self.0.port_or_known_default() {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.0.path())?;

        if self.0.query().is_some() {
            write!(f, "?…")?;
        }
        Ok(())
    }
}

impl Serialize for RpcUrl {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl std::fmt::Debug for RpcUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")?;
        Ok(())
    }
}

impl From<RpcUrl> for url::Url {
    fn from(rpc_url: RpcUrl) -> Self {
        rpc_url.0
    }
}

impl From<url::Url> for RpcUrl {
    fn from(url: url::Url) -> Self {
        RpcUrl(url)
    }
}

impl std::ops::Deref for RpcUrl {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RpcUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RpcUrlVistor;
        impl<'de> serde::de::Visitor<'de> for RpcUrlVistor {
            type Value = url::Url;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "rpc url string or an env var containing a rpc url string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {var}: {e}",
                        ))
                    })?;
                    url::Url::parse(&val).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "invalid rpc url in env {var}: {e}"
                        ))
                    })
                } else {
                    url::Url::parse(value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "invalid rpc url {value}: {e}"
                        ))
                    })
                }
            }
        }

        let rpc_url = deserializer.deserialize_str(RpcUrlVistor)?;
        Ok(Self(rpc_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        url: RpcUrl,
    }

    #[test]
    fn reads_env_urls_and_hides_the_query() {
        std::env::set_var(
            "OMBU_TEST_RPC_URL",
            "https://arb-sepolia.example.org/v2?key=secret",
        );
        let holder: Holder = serde_json::from_value(
            serde_json::json!({ "url": "$OMBU_TEST_RPC_URL" }),
        )
        .unwrap();
        assert_eq!(holder.url.host_str(), Some("arb-sepolia.example.org"));
        let shown = holder.url.to_string();
        assert!(!shown.contains("secret"));
        assert_eq!(shown, "https://arb-sepolia.example.org:443/v2?…");
    }

    #[test]
    fn rejects_garbage() {
        let bad = serde_json::json!({ "url": "not a url" });
        assert!(serde_json::from_value::<Holder>(bad).is_err());
    }
}
