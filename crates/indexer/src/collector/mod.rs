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

pub mod periodic;
pub mod txs;

use std::{error::Error as StdError, sync::Arc, time::Duration};

use fcd_rewards::{decompose_block_rewards, RewardParseError, DEFAULT_NATIVE_DENOM};
use thiserror::Error;

use crate::{
    db::{blocks, BlockRecord, DbError, IndexedBlock, IndexerDb, IndexerDbObj},
    lcd::{ChainReaderObj, LcdBlock, LcdClient, LcdClientConfig, LcdError},
    validators::{ResolveError, ValidatorResolver},
};

pub use periodic::{
    minute_window, truncate_to_minute, GeneralInfoCollector, PeriodicCollector, PriceCollector,
    RewardWindowCollector,
};
pub use txs::{TxCollector, TxFollower, TxHashCollector};

/// Message some nodes return when history for a height has been pruned.
pub const PRUNED_TX_MESSAGE: &str = "transaction not found on node";

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("chain read error: {0}")]
    Lcd(#[from] LcdError),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("failed to decompose rewards of block {height}: {source}")]
    Parse { height: u64, source: RewardParseError },

    #[error("undecodable transaction in block {height}: {source}")]
    TxDecode { height: u64, source: base64::DecodeError },

    #[error("block {height} belongs to chain {found}, expected {expected}")]
    ChainIdMismatch { height: u64, expected: String, found: String },

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl CollectorError {
    /// Whether the failure comes from the node no longer holding the requested history.
    pub fn is_pruned(&self) -> bool {
        let structured = match self {
            Self::Lcd(e) | Self::Resolution(ResolveError::Lcd(e)) => e.is_pruned(),
            Self::Collaborator(e) => e
                .chain()
                .any(|cause| cause.downcast_ref::<LcdError>().is_some_and(LcdError::is_pruned)),
            _ => false,
        };
        structured || chain_mentions(self, PRUNED_TX_MESSAGE)
    }
}

fn chain_mentions(err: &(dyn StdError + 'static), needle: &str) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().contains(needle) {
            return true;
        }
        current = e.source();
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    AwaitingHead,
    Syncing,
    IdleCaughtUp,
    HaltedOnError,
}

/// Outcome of one sync pass that did not surface an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub state: SyncState,
    pub latest_height: u64,
    /// Height the next pass starts from.
    pub next_height: u64,
    pub blocks_indexed: u64,
    /// The pass stopped because the node pruned the data for `next_height`.
    pub pruned: bool,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self {
            state: SyncState::AwaitingHead,
            latest_height: 0,
            next_height: 1,
            blocks_indexed: 0,
            pruned: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BlockCollectorServiceConfig {
    pub chain_id: String,
    pub native_denom: String,
    /// Delay between polls while the chain has no head block.
    pub head_poll_interval: Duration,
}

impl BlockCollectorServiceConfig {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            native_denom: DEFAULT_NATIVE_DENOM.to_string(),
            head_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Sequential chain sync: ingests every height after the last committed one, one atomic
/// unit per block.
///
/// Passes for the same chain must not run concurrently.
pub struct BlockCollectorService {
    chain: ChainReaderObj,
    db: IndexerDbObj,
    validators: ValidatorResolver,
    periodic: Vec<Box<dyn PeriodicCollector>>,
    tx_collector: Box<dyn TxCollector>,
    tx_followers: Vec<Box<dyn TxFollower>>,
    config: BlockCollectorServiceConfig,
    state: SyncState,
}

impl BlockCollectorService {
    pub async fn new(
        lcd_config: LcdClientConfig,
        db_conn: &str,
        config: BlockCollectorServiceConfig,
    ) -> anyhow::Result<Self> {
        let chain: ChainReaderObj = Arc::new(LcdClient::new(lcd_config)?);
        let db: IndexerDbObj = Arc::new(IndexerDb::new(db_conn).await?);
        Ok(Self::from_parts(chain, db, config).with_default_collectors())
    }

    /// Service with the default transaction collector and no periodic collectors.
    pub fn from_parts(chain: ChainReaderObj, db: IndexerDbObj, config: BlockCollectorServiceConfig) -> Self {
        Self {
            validators: ValidatorResolver::new(&config.chain_id),
            chain,
            db,
            periodic: Vec::new(),
            tx_collector: Box::new(TxHashCollector),
            tx_followers: Vec::new(),
            config,
            state: SyncState::AwaitingHead,
        }
    }

    /// Register the reward, price and general collectors, in that order. The network
    /// aggregator slot between reward and price is left to callers.
    pub fn with_default_collectors(self) -> Self {
        let chain_id = self.config.chain_id.clone();
        let native_denom = self.config.native_denom.clone();
        let chain = self.chain.clone();
        self.with_periodic_collector(Box::new(RewardWindowCollector::new(&chain_id)))
            .with_periodic_collector(Box::new(PriceCollector::new(chain.clone(), &chain_id)))
            .with_periodic_collector(Box::new(GeneralInfoCollector::new(chain, &chain_id, &native_denom)))
    }

    pub fn with_periodic_collector(mut self, collector: Box<dyn PeriodicCollector>) -> Self {
        self.periodic.push(collector);
        self
    }

    pub fn with_tx_collector(mut self, collector: Box<dyn TxCollector>) -> Self {
        self.tx_collector = collector;
        self
    }

    pub fn with_tx_follower(mut self, follower: Box<dyn TxFollower>) -> Self {
        self.tx_followers.push(follower);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn validators(&self) -> &ValidatorResolver {
        &self.validators
    }

    /// Run one sync pass.
    ///
    /// Stops without error when the next block is not available yet or the node has pruned
    /// its data. Any other failure halts the pass and is returned; nothing of the failing
    /// block is committed, so the next pass resumes at the same height.
    pub async fn run(&mut self) -> Result<SyncReport, CollectorError> {
        let start_time = std::time::Instant::now();
        let mut report = SyncReport::default();

        match self.sync(&mut report).await {
            Ok(()) => {
                self.state = SyncState::IdleCaughtUp;
                report.state = SyncState::IdleCaughtUp;
                tracing::info!(
                    "Sync pass caught up: {} blocks indexed, next height {} (head {}) in {:.2}s",
                    report.blocks_indexed,
                    report.next_height,
                    report.latest_height,
                    start_time.elapsed().as_secs_f64()
                );
                Ok(report)
            }
            Err(e) if e.is_pruned() => {
                self.state = SyncState::IdleCaughtUp;
                report.state = SyncState::IdleCaughtUp;
                report.pruned = true;
                tracing::warn!("Stopping at height {}: data pruned on node: {}", report.next_height, e);
                Ok(report)
            }
            Err(e) => {
                self.state = SyncState::HaltedOnError;
                tracing::error!(
                    height = report.next_height,
                    "Failed to index block {}: {:?}",
                    report.next_height,
                    e
                );
                Err(e)
            }
        }
    }

    async fn sync(&mut self, report: &mut SyncReport) -> Result<(), CollectorError> {
        self.state = SyncState::AwaitingHead;
        report.latest_height = self.await_head().await?;

        self.state = SyncState::Syncing;
        let mut previous = self.db.last_indexed_block(&self.config.chain_id).await?;
        report.next_height = previous.map(|b| b.height).unwrap_or(0) + 1;
        tracing::debug!(
            "Syncing {} from height {} to {}",
            self.config.chain_id,
            report.next_height,
            report.latest_height
        );

        while report.next_height <= report.latest_height {
            let Some(block) = self.chain.block(report.next_height).await? else {
                tracing::debug!("Block {} not available yet", report.next_height);
                break;
            };

            let indexed = self.save_block(&block, previous).await?;
            previous = Some(indexed);
            report.blocks_indexed += 1;
            report.next_height = indexed.height + 1;
        }

        Ok(())
    }

    async fn await_head(&self) -> Result<u64, CollectorError> {
        loop {
            if let Some(block) = self.chain.latest_block().await? {
                return Ok(block.height());
            }
            tracing::debug!(
                "Chain has no head block yet, retrying in {:?}",
                self.config.head_poll_interval
            );
            tokio::time::sleep(self.config.head_poll_interval).await;
        }
    }

    /// Persist one block and everything derived from it in a single atomic unit.
    async fn save_block(
        &mut self,
        block: &LcdBlock,
        previous: Option<IndexedBlock>,
    ) -> Result<IndexedBlock, CollectorError> {
        let header = &block.block.header;
        let height = header.height;
        if header.chain_id != self.config.chain_id {
            return Err(CollectorError::ChainIdMismatch {
                height,
                expected: self.config.chain_id.clone(),
                found: header.chain_id.clone(),
            });
        }

        tracing::info!("Begin transaction for block {}", height);
        let mut tx = self.db.begin().await?;

        let events = self.chain.reward_events(height).await?;
        let reward = decompose_block_rewards(&events)
            .map_err(|source| CollectorError::Parse { height, source })?;
        blocks::insert_block_reward(&mut tx, &self.config.chain_id, height, header.time, &reward)
            .await?;

        let proposer =
            self.validators.resolve(self.chain.as_ref(), &header.proposer_address, height).await?;

        let tx_hashes =
            block.tx_hashes().map_err(|source| CollectorError::TxDecode { height, source })?;
        let record = BlockRecord {
            chain_id: self.config.chain_id.clone(),
            height,
            time: header.time,
            proposer,
            tx_count: tx_hashes.len(),
        };
        blocks::insert_block(&mut tx, &record).await?;

        if !tx_hashes.is_empty() {
            let txs = self.tx_collector.collect(&mut tx, &tx_hashes, height, &record).await?;
            for follower in &self.tx_followers {
                follower.follow(&mut tx, &txs, height).await?;
            }
        }

        if let Some(window_end) = minute_window(previous.map(|b| b.time), header.time) {
            for collector in &self.periodic {
                tracing::debug!(
                    "Running {} collector for window ending {} at height {}",
                    collector.name(),
                    window_end,
                    height
                );
                collector.run(&mut tx, window_end, height).await.map_err(|e| {
                    e.context(format!("{} collector failed at height {}", collector.name(), height))
                })?;
            }
        }

        tx.commit().await.map_err(DbError::from)?;
        tracing::info!("Transaction finished for block {}", height);

        Ok(IndexedBlock { height, time: header.time })
    }
}
