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

use ark_bn254::Fr as Bn254Fr;
use ark_ff::{BigInteger, PrimeField};
use arkworks_native_gadgets::poseidon::{FieldHasher, Poseidon};
use arkworks_setups::common::setup_params;
use arkworks_setups::Curve;
use ethers::types::U256;
use once_cell::sync::Lazy;

use ombu_relayer_utils::{Error, Result};

use crate::{LeanIMT, TreeHasher};

// x^5 sbox, width 3: the two input Poseidon Semaphore hashes its tree with.
static POSEIDON: Lazy<Poseidon<Bn254Fr>> = Lazy::new(|| {
    let params = setup_params::<Bn254Fr>(Curve::Bn254, 5, 3);
    Poseidon::<Bn254Fr>::new(params)
});

/// Converts a `U256` into a BN254 scalar, reducing it modulo the field order.
pub fn u256_to_fr(value: U256) -> Bn254Fr {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Bn254Fr::from_be_bytes_mod_order(&bytes)
}

/// Converts a BN254 scalar into a `U256`.
pub fn fr_to_u256(value: &Bn254Fr) -> U256 {
    U256::from_big_endian(&value.into_repr().to_bytes_be())
}

/// Poseidon over BN254 on `U256` nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseidonHasher;

impl TreeHasher for PoseidonHasher {
    type Node = U256;

    fn hash_pair(&self, left: &U256, right: &U256) -> Result<U256> {
        let parent = POSEIDON
            .hash_two(&u256_to_fr(*left), &u256_to_fr(*right))
            .map_err(|e| Error::MembershipTree(format!("{e:?}")))?;
        Ok(fr_to_u256(&parent))
    }
}

/// Root of the tree built from `commitments` in order, zero when empty.
pub fn compute_root(commitments: &[U256]) -> Result<U256> {
    let tree =
        LeanIMT::from_leaves(PoseidonHasher, commitments.iter().copied())?;
    Ok(tree.root_or_zero())
}
