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

pub mod client;
pub mod types;

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use fcd_rewards::{Coin, RawRewardEvent};
use thiserror::Error;

pub use client::{LcdClient, LcdClientConfig};
pub use types::{
    tx_hash, ConsensusValidator, LcdBlock, PubKey, StakingPool, ValidatorDescriptor,
};

/// Number of validator set pages merged into the consensus view.
pub const CONSENSUS_SET_PAGES: u32 = 3;

pub type ChainReaderObj = Arc<dyn ChainReader>;

#[derive(Error, Debug)]
pub enum LcdError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} failed with status {status}: {message}")]
    Status { url: String, status: u16, message: String },

    #[error("request to {url} rejected: {message}")]
    InvalidRequest { url: String, message: String },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("data pruned on node: {0}")]
    Pruned(String),
}

impl LcdError {
    pub fn is_pruned(&self) -> bool {
        matches!(self, Self::Pruned(_))
    }
}

/// Read access to the chain through its light client daemon and tendermint RPC.
///
/// Lookups of things that do not exist return `Ok(None)` or an empty list.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Most recent block. `None` if the node has nothing to serve yet.
    async fn latest_block(&self) -> Result<Option<LcdBlock>, LcdError>;

    async fn block(&self, height: u64) -> Result<Option<LcdBlock>, LcdError>;

    /// Distribution events emitted at the beginning of the block at `height`.
    async fn reward_events(&self, height: u64) -> Result<Vec<RawRewardEvent>, LcdError>;

    /// All validators known to the staking module, whatever their bonding status.
    async fn validators(&self, height: Option<u64>) -> Result<Vec<ValidatorDescriptor>, LcdError>;

    /// One page of the tendermint validator set.
    async fn validator_set_page(
        &self,
        height: Option<u64>,
        page: u32,
    ) -> Result<Vec<ConsensusValidator>, LcdError>;

    /// The consensus validator set, merged over the first pages and deduplicated by address.
    ///
    /// Only the first page is required. Later pages that fail are treated as empty.
    async fn validator_consensus(
        &self,
        height: Option<u64>,
    ) -> Result<Vec<ConsensusValidator>, LcdError> {
        let mut merged = self.validator_set_page(height, 1).await?;

        for page in 2..=CONSENSUS_SET_PAGES {
            match self.validator_set_page(height, page).await {
                Ok(validators) => merged.extend(validators),
                Err(e) => {
                    tracing::debug!("Ignoring validator set page {} failure: {}", page, e);
                }
            }
        }

        let mut seen = HashSet::new();
        merged.retain(|v| seen.insert(v.address.clone()));
        Ok(merged)
    }

    async fn staking_pool(&self, height: Option<u64>) -> Result<Option<StakingPool>, LcdError>;

    async fn total_supply(&self, height: Option<u64>) -> Result<Vec<Coin>, LcdError>;

    /// Oracle exchange rates: units of each denom per one unit of the native denom.
    async fn oracle_prices(&self, height: Option<u64>) -> Result<Vec<Coin>, LcdError>;
}
