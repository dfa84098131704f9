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

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Block as served by the LCD `/blocks` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcdBlock {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub data: BlockData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    #[serde(with = "string_u64")]
    pub height: u64,
    pub time: DateTime<Utc>,
    /// Consensus address of the proposer, hex encoded.
    pub proposer_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockData {
    /// Base64 encoded raw transactions. Nodes send `null` for empty blocks.
    #[serde(default)]
    pub txs: Option<Vec<String>>,
}

impl LcdBlock {
    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.block.header.time
    }

    /// Hashes of every transaction in the block, in block order.
    pub fn tx_hashes(&self) -> Result<Vec<String>, base64::DecodeError> {
        self.block.data.txs.as_deref().unwrap_or_default().iter().map(|tx| tx_hash(tx)).collect()
    }
}

/// Uppercase hex SHA-256 of a base64 encoded raw transaction.
pub fn tx_hash(raw_tx: &str) -> Result<String, base64::DecodeError> {
    let bytes = BASE64.decode(raw_tx)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode_upper(&digest[..32]))
}

/// Consensus public key, either a bech32 string (older LCDs) or a typed key object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PubKey {
    Typed {
        #[serde(rename = "type", alias = "@type", default)]
        kind: String,
        #[serde(alias = "key")]
        value: String,
    },
    Encoded(String),
}

impl PubKey {
    /// Raw key bytes of a typed key.
    pub fn key_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Typed { value, .. } => BASE64.decode(value).ok(),
            Self::Encoded(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorDescription {
    #[serde(default)]
    pub moniker: String,
}

/// Staking module view of a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorDescriptor {
    pub operator_address: String,
    pub consensus_pubkey: PubKey,
    #[serde(default)]
    pub description: ValidatorDescription,
}

/// Entry of the tendermint validator set at some height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusValidator {
    /// Bech32 consensus address.
    pub address: String,
    pub pub_key: PubKey,
    #[serde(default)]
    pub voting_power: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSetPage {
    #[serde(default)]
    pub block_height: Option<String>,
    #[serde(default)]
    pub validators: Vec<ConsensusValidator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingPool {
    pub bonded_tokens: String,
    pub not_bonded_tokens: String,
}

pub(crate) mod string_u64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrNumber {
            String(String),
            Number(u64),
        }

        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::String(s) => s.parse().map_err(D::Error::custom),
            StringOrNumber::Number(n) => Ok(n),
        }
    }
}
