// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use thiserror::Error;

use crate::lcd::{ChainReader, LcdError, PubKey};

/// Chain whose staking and consensus endpoints encode public keys differently.
const KEY_VALUE_CHAIN_ID: &str = "columbus-5";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("could not find validator by {hex_address} at height {height}")]
    NotFound { hex_address: String, height: u64 },

    #[error("LCD error while resolving validators: {0}")]
    Lcd(#[from] LcdError),
}

/// How a staking validator's key is compared with a consensus set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubKeyMatch {
    /// Compare only the key material of typed keys.
    KeyValue,
    /// Keys must be identical.
    Exact,
}

impl PubKeyMatch {
    pub fn for_chain(chain_id: &str) -> Self {
        if chain_id == KEY_VALUE_CHAIN_ID {
            Self::KeyValue
        } else {
            Self::Exact
        }
    }

    pub fn matches(&self, staking: &PubKey, consensus: &PubKey) -> bool {
        match self {
            Self::Exact => staking == consensus,
            Self::KeyValue => match (staking, consensus) {
                (PubKey::Typed { value: a, .. }, PubKey::Typed { value: b, .. }) => {
                    a == b || matches!((staking.key_bytes(), consensus.key_bytes()), (Some(x), Some(y)) if x == y)
                }
                _ => false,
            },
        }
    }
}

/// Uppercase hex form of a bech32 consensus address. Hex input is passed through.
pub fn consensus_address_to_hex(address: &str) -> Option<String> {
    match bech32::decode(address) {
        Ok((_, data)) => Some(hex::encode_upper(data)),
        Err(_) if !address.is_empty() && address.chars().all(|c| c.is_ascii_hexdigit()) => {
            Some(address.to_ascii_uppercase())
        }
        Err(_) => None,
    }
}

/// Maps block proposer consensus addresses to validator operator addresses.
///
/// Entries are only ever added. A miss refreshes the whole mapping from the chain at the
/// height being processed.
pub struct ValidatorResolver {
    cache: HashMap<String, String>,
    pubkey_match: PubKeyMatch,
}

impl ValidatorResolver {
    pub fn new(chain_id: &str) -> Self {
        Self { cache: HashMap::new(), pubkey_match: PubKeyMatch::for_chain(chain_id) }
    }

    pub fn cached(&self, hex_address: &str) -> Option<&str> {
        self.cache.get(&hex_address.to_ascii_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Operator address of the validator whose consensus address is `hex_address`.
    pub async fn resolve(
        &mut self,
        reader: &dyn ChainReader,
        hex_address: &str,
        height: u64,
    ) -> Result<String, ResolveError> {
        let key = hex_address.to_ascii_uppercase();
        if let Some(operator) = self.cache.get(&key) {
            return Ok(operator.clone());
        }

        self.refresh(reader, height).await?;

        self.cache
            .get(&key)
            .cloned()
            .ok_or(ResolveError::NotFound { hex_address: hex_address.to_string(), height })
    }

    /// Load every validator and the consensus set at `height` and record each pairing.
    /// Returns the number of mappings recorded.
    pub async fn refresh(&mut self, reader: &dyn ChainReader, height: u64) -> Result<usize, ResolveError> {
        let validators = reader.validators(Some(height)).await?;
        let consensus_set = reader.validator_consensus(Some(height)).await?;

        let mut recorded = 0;
        for entry in &consensus_set {
            let Some(validator) = validators
                .iter()
                .find(|v| self.pubkey_match.matches(&v.consensus_pubkey, &entry.pub_key))
            else {
                continue;
            };

            match consensus_address_to_hex(&entry.address) {
                Some(hex_address) => {
                    self.cache.insert(hex_address, validator.operator_address.clone());
                    recorded += 1;
                }
                None => {
                    tracing::warn!("Skipping undecodable consensus address {}", entry.address);
                }
            }
        }

        tracing::debug!(
            "Refreshed validator mapping at height {}: {} recorded, {} cached",
            height,
            recorded,
            self.cache.len()
        );
        Ok(recorded)
    }
}
