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

//! Serde helpers that write `U256` values as decimal strings.
//!
//! Commitments and roots are field elements that do not fit in a JSON
//! number, and clients expect them in base 10 rather than the `0x` form
//! `ethers` uses by default. Deserialization also accepts `0x` hex strings
//! and plain JSON numbers.

use ethers::types::U256;
use serde::{Deserialize, Deserializer, Serializer};

/// Parses a decimal or `0x` prefixed hex string into a `U256`.
pub fn parse_u256(value: &str) -> Option<U256> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => U256::from_dec_str(value).ok(),
    }
}

/// What clients send for a `uint256`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(u64),
    Text(String),
}

impl Repr {
    fn into_u256<E: serde::de::Error>(self) -> Result<U256, E> {
        match self {
            Repr::Number(value) => Ok(U256::from(value)),
            Repr::Text(value) => parse_u256(&value).ok_or_else(|| {
                E::custom(format!("invalid uint256 value: {value}"))
            }),
        }
    }
}

pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    Repr::deserialize(deserializer)?.into_u256()
}

/// Same as the parent module, for optional values.
pub mod option {
    use super::*;

    pub fn serialize<S>(
        value: &Option<U256>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Repr>::deserialize(deserializer)?
            .map(Repr::into_u256)
            .transpose()
    }
}

/// Writes values that fit in a `u64` as JSON numbers, larger ones as
/// decimal strings. Meant for identifiers such as group ids, which are
/// `uint256` on chain but small in practice.
pub mod compact {
    use super::*;

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match u64::try_from(*value) {
            Ok(small) => serializer.serialize_u64(small),
            Err(_) => serializer.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        super::deserialize(deserializer)
    }
}

/// Same as the parent module, for sequences.
pub mod vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(Repr::into_u256)
            .collect()
    }
}
