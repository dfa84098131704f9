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

use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use fcd_indexer::{
    db::{IndexerDb, IndexerDbObj},
    lcd::ChainReaderObj,
    test_utils::MockChain,
    BlockCollectorService, BlockCollectorServiceConfig,
};
use fcd_rewards::{Coin, RawRewardEvent, RewardKind};
use sqlx::Row;
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

pub const CHAIN_ID: &str = "columbus-5";
pub const PROPOSER_HEX: &str = "4EE4D3AF9A0E1DB41E6A2A3C6D4ED4CC3C1CBA7D";
pub const OPERATOR: &str = "terravaloper1proposer";

// Keeps the database file alive as long as the environment exists
pub struct TestEnv {
    pub chain: Arc<MockChain>,
    pub db: Arc<IndexerDb>,
    _temp_file: NamedTempFile,
}

pub async fn setup() -> TestEnv {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_file.path().to_str().expect("Invalid temp path");
    let db = Arc::new(IndexerDb::new(&format!("sqlite:{}", db_path)).await.expect("Failed to create database"));

    let chain = Arc::new(MockChain::new(CHAIN_ID));
    chain.add_validator(OPERATOR, PROPOSER_HEX);
    chain.set_staking_pool("600", "50");
    chain.set_supply(vec![coin("uluna", "1000"), coin("ukrw", "5000")]);
    chain.set_prices(vec![coin("ukrw", "250")]);

    TestEnv { chain, db, _temp_file: temp_file }
}

impl TestEnv {
    pub fn chain_obj(&self) -> ChainReaderObj {
        self.chain.clone()
    }

    pub fn db_obj(&self) -> IndexerDbObj {
        self.db.clone()
    }

    /// Collector without periodic jobs.
    pub fn service(&self) -> BlockCollectorService {
        BlockCollectorService::from_parts(self.chain_obj(), self.db_obj(), config())
    }

    /// Register blocks `heights`, one every `step_secs` from `start`, each paying `1uluna`
    /// of rewards to the proposer.
    pub fn add_blocks(&self, heights: RangeInclusive<u64>, start: DateTime<Utc>, step_secs: i64) {
        let first = *heights.start();
        for height in heights {
            let time = start + chrono::Duration::seconds((height - first) as i64 * step_secs);
            self.chain.add_block(height, time, PROPOSER_HEX, vec![]);
            self.chain.set_reward_events(height, vec![reward(OPERATOR, "1uluna")]);
        }
    }

    pub async fn count(&self, table: &str) -> i64 {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
            .fetch_one(self.db.pool())
            .await
            .expect("count query failed");
        row.try_get("n").expect("count column")
    }
}

pub fn config() -> BlockCollectorServiceConfig {
    BlockCollectorServiceConfig {
        head_poll_interval: Duration::from_millis(10),
        ..BlockCollectorServiceConfig::new(CHAIN_ID)
    }
}

pub fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 10, 1, hour, min, sec).unwrap()
}

pub fn coin(denom: &str, amount: &str) -> Coin {
    Coin { denom: denom.to_string(), amount: amount.to_string() }
}

pub fn reward(validator: &str, amount: &str) -> RawRewardEvent {
    RawRewardEvent { validator: validator.to_string(), kind: RewardKind::Rewards, amount: amount.to_string() }
}

pub fn commission(validator: &str, amount: &str) -> RawRewardEvent {
    RawRewardEvent {
        validator: validator.to_string(),
        kind: RewardKind::Commission,
        amount: amount.to_string(),
    }
}
