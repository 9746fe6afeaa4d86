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

use std::str::FromStr;

use ethers::types::H256;
use serde::Deserialize;

/// The relayer signing key.
///
/// Deserializes from a `0x` prefixed hex string, or from `$VAR` naming an
/// environment variable that holds one. Never printed.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        PrivateKey(secret)
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = H256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn parse_secret<E: serde::de::Error>(value: &str) -> Result<H256, E> {
    let value = value.trim();
    let with_prefix = if value.starts_with("0x") {
        value.to_string()
    } else {
        format!("0x{value}")
    };
    H256::from_str(&with_prefix).map_err(|e| {
        E::custom(format!(
            "{e}\n expected a 66 chars string (including the 0x prefix) but found {} chars",
            with_prefix.len()
        ))
    })
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVistor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVistor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value.starts_with("0x") {
                    parse_secret(value)
                } else if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {var}: {e}",
                        ))
                    })?;
                    // keys exported from wallets often come without the prefix
                    parse_secret(&val)
                } else {
                    Err(serde::de::Error::custom(
                        "expected a 0x prefixed hex private key or a $ENV_VAR",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVistor)?;
        Ok(Self(secret))
    }
}
