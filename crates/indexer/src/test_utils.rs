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

//! In-memory chain used by unit and integration tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bech32::{Bech32, Hrp};
use chrono::{DateTime, Utc};
use fcd_rewards::{Coin, RawRewardEvent};

use crate::lcd::{
    types::{Block, BlockData, BlockHeader},
    ChainReader, ConsensusValidator, LcdBlock, LcdError, PubKey, StakingPool,
    ValidatorDescriptor,
};

#[derive(Default)]
struct MockChainState {
    head: Option<u64>,
    blocks: BTreeMap<u64, LcdBlock>,
    reward_events: HashMap<u64, Vec<RawRewardEvent>>,
    pruned: HashSet<u64>,
    validators: Vec<ValidatorDescriptor>,
    consensus_pages: Vec<Vec<ConsensusValidator>>,
    staking_pool: Option<StakingPool>,
    supply: Vec<Coin>,
    prices: Vec<Coin>,
}

/// A [ChainReader] serving blocks and validator data registered by the test.
#[derive(Default)]
pub struct MockChain {
    chain_id: String,
    state: Mutex<MockChainState>,
    validator_set_calls: AtomicUsize,
}

/// Bech32 consensus address for raw address bytes given as hex.
pub fn consensus_address(hex_address: &str) -> String {
    let bytes = hex::decode(hex_address).expect("test address must be hex");
    let hrp = Hrp::parse("terravalcons").expect("valid hrp");
    bech32::encode::<Bech32>(hrp, &bytes).expect("encodable address")
}

impl MockChain {
    pub fn new(chain_id: &str) -> Self {
        Self { chain_id: chain_id.to_string(), ..Default::default() }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockChainState) -> R) -> R {
        let mut state = self.state.lock().expect("mock chain lock poisoned");
        f(&mut state)
    }

    /// Register a block. Does not move the head.
    pub fn add_block(&self, height: u64, time: DateTime<Utc>, proposer: &str, txs: Vec<String>) {
        let block = LcdBlock {
            block: Block {
                header: BlockHeader {
                    chain_id: self.chain_id.clone(),
                    height,
                    time,
                    proposer_address: proposer.to_string(),
                },
                data: BlockData { txs: if txs.is_empty() { None } else { Some(txs) } },
            },
        };
        self.with_state(|s| s.blocks.insert(height, block));
    }

    pub fn set_head(&self, height: u64) {
        self.with_state(|s| s.head = Some(height));
    }

    pub fn remove_block(&self, height: u64) {
        self.with_state(|s| s.blocks.remove(&height));
    }

    pub fn set_reward_events(&self, height: u64, events: Vec<RawRewardEvent>) {
        self.with_state(|s| s.reward_events.insert(height, events));
    }

    /// Make reward queries at `height` fail the way a pruned node does.
    pub fn prune(&self, height: u64) {
        self.with_state(|s| s.pruned.insert(height));
    }

    /// Register a validator known both to staking and to the first validator set page.
    pub fn add_validator(&self, operator: &str, hex_address: &str) {
        let key = BASE64.encode(operator.as_bytes());
        self.add_validator_on_page(1, operator, hex_address, &key);
    }

    pub fn add_validator_on_page(&self, page: usize, operator: &str, hex_address: &str, key: &str) {
        let descriptor = ValidatorDescriptor {
            operator_address: operator.to_string(),
            consensus_pubkey: PubKey::Typed {
                kind: "/cosmos.crypto.ed25519.PubKey".into(),
                value: key.to_string(),
            },
            description: Default::default(),
        };
        let consensus = ConsensusValidator {
            address: consensus_address(hex_address),
            pub_key: PubKey::Typed { kind: "tendermint/PubKeyEd25519".into(), value: key.to_string() },
            voting_power: Some("1".into()),
        };
        self.with_state(|s| {
            s.validators.push(descriptor);
            if s.consensus_pages.len() < page {
                s.consensus_pages.resize(page, Vec::new());
            }
            s.consensus_pages[page - 1].push(consensus);
        });
    }

    pub fn set_staking_pool(&self, bonded: &str, not_bonded: &str) {
        self.with_state(|s| {
            s.staking_pool = Some(StakingPool {
                bonded_tokens: bonded.to_string(),
                not_bonded_tokens: not_bonded.to_string(),
            })
        });
    }

    pub fn set_supply(&self, supply: Vec<Coin>) {
        self.with_state(|s| s.supply = supply);
    }

    pub fn set_prices(&self, prices: Vec<Coin>) {
        self.with_state(|s| s.prices = prices);
    }

    /// Number of validator set page requests served.
    pub fn validator_set_calls(&self) -> usize {
        self.validator_set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn latest_block(&self) -> Result<Option<LcdBlock>, LcdError> {
        Ok(self.with_state(|s| s.head.and_then(|h| s.blocks.get(&h).cloned())))
    }

    async fn block(&self, height: u64) -> Result<Option<LcdBlock>, LcdError> {
        Ok(self.with_state(|s| s.blocks.get(&height).cloned()))
    }

    async fn reward_events(&self, height: u64) -> Result<Vec<RawRewardEvent>, LcdError> {
        self.with_state(|s| {
            if s.pruned.contains(&height) {
                return Err(LcdError::Pruned(format!(
                    "height {} is not available, lowest height is {}",
                    height,
                    height + 1
                )));
            }
            Ok(s.reward_events.get(&height).cloned().unwrap_or_default())
        })
    }

    async fn validators(&self, _height: Option<u64>) -> Result<Vec<ValidatorDescriptor>, LcdError> {
        Ok(self.with_state(|s| s.validators.clone()))
    }

    async fn validator_set_page(
        &self,
        _height: Option<u64>,
        page: u32,
    ) -> Result<Vec<ConsensusValidator>, LcdError> {
        self.validator_set_calls.fetch_add(1, Ordering::SeqCst);
        self.with_state(|s| match s.consensus_pages.get(page as usize - 1) {
            Some(validators) => Ok(validators.clone()),
            None if page == 1 => Ok(Vec::new()),
            None => Err(LcdError::Status {
                url: format!("mock://validatorsets?page={}", page),
                status: 500,
                message: "page out of range".into(),
            }),
        })
    }

    async fn staking_pool(&self, _height: Option<u64>) -> Result<Option<StakingPool>, LcdError> {
        Ok(self.with_state(|s| s.staking_pool.clone()))
    }

    async fn total_supply(&self, _height: Option<u64>) -> Result<Vec<Coin>, LcdError> {
        Ok(self.with_state(|s| s.supply.clone()))
    }

    async fn oracle_prices(&self, _height: Option<u64>) -> Result<Vec<Coin>, LcdError> {
        Ok(self.with_state(|s| s.prices.clone()))
    }
}
