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

pub mod aggregates;
pub mod blocks;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fcd_rewards::{math, DecimalError, RewardComponents, RewardRow, StakingSample};
use sqlx::{any::AnyPoolOptions, Any, AnyPool, Row, Transaction};
use thiserror::Error;

pub use aggregates::GeneralInfoRecord;
pub use blocks::{BlockRecord, IndexedBlock, RewardTotals, TxRecord};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQL error {0:?}")]
    SqlErr(#[from] sqlx::Error),

    #[error("SQL Migration error {0:?}")]
    MigrateErr(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid block number: {0}")]
    BadBlockNumb(String),

    #[error("Invalid row: {0}")]
    BadRow(String),

    #[error("JSON error {0:?}")]
    JsonErr(#[from] serde_json::Error),

    #[error(transparent)]
    Decimal(#[from] DecimalError),
}

pub type IndexerDbObj = Arc<dyn IndexerStore + Send + Sync>;

/// Half-open `[from, to)` range of UTC times. No lower bound when `from` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    fn bounds(&self) -> (i64, i64) {
        (self.from.map(|t| t.timestamp()).unwrap_or(i64::MIN), self.to.timestamp())
    }
}

#[async_trait]
pub trait IndexerStore {
    /// Start an atomic unit. Dropping it without commit rolls everything back.
    async fn begin(&self) -> Result<Transaction<'static, Any>, DbError>;

    /// Highest committed block of a chain.
    async fn last_indexed_block(&self, chain_id: &str) -> Result<Option<IndexedBlock>, DbError>;

    async fn reward_rows(&self, chain_id: &str, range: TimeRange) -> Result<Vec<RewardRow>, DbError>;

    async fn staking_samples(
        &self,
        chain_id: &str,
        range: TimeRange,
    ) -> Result<Vec<StakingSample>, DbError>;

    /// Reward and commission of one validator over the committed blocks in `[from, to)`.
    async fn validator_reward_totals(
        &self,
        chain_id: &str,
        operator: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RewardTotals, DbError>;

    /// Mean oracle price per day and denom.
    async fn daily_prices(
        &self,
        chain_id: &str,
        range: TimeRange,
    ) -> Result<HashMap<(NaiveDate, String), String>, DbError>;
}

pub struct IndexerDb {
    pool: AnyPool,
}

impl IndexerDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

pub(crate) fn from_unix(seconds: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| DbError::BadRow(format!("timestamp out of range: {}", seconds)))
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Block times keep the chain's nanosecond precision.
pub(crate) fn to_unix_nanos(time: DateTime<Utc>) -> Result<i64, DbError> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| DbError::BadRow(format!("block time out of range: {}", time)))
}

pub(crate) fn from_unix_nanos(nanos: i64) -> Result<DateTime<Utc>, DbError> {
    let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SEC))
        .map_err(|_| DbError::BadRow(format!("block time out of range: {}", nanos)))?;
    DateTime::from_timestamp(nanos.div_euclid(NANOS_PER_SEC), subsec)
        .ok_or_else(|| DbError::BadRow(format!("block time out of range: {}", nanos)))
}

#[async_trait]
impl IndexerStore for IndexerDb {
    async fn begin(&self) -> Result<Transaction<'static, Any>, DbError> {
        Ok(self.pool.begin().await?)
    }

    async fn last_indexed_block(&self, chain_id: &str) -> Result<Option<IndexedBlock>, DbError> {
        let mut conn = self.pool.acquire().await?;
        blocks::last_indexed_block(&mut conn, chain_id).await
    }

    async fn validator_reward_totals(
        &self,
        chain_id: &str,
        operator: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RewardTotals, DbError> {
        let mut conn = self.pool.acquire().await?;
        blocks::validator_reward_totals_between(&mut conn, chain_id, operator, from, to).await
    }

    async fn reward_rows(&self, chain_id: &str, range: TimeRange) -> Result<Vec<RewardRow>, DbError> {
        let (from, to) = range.bounds();
        let rows = sqlx::query(
            "SELECT datetime, denom, tax, gas, oracle, reward, commission FROM reward
             WHERE chain_id = $1 AND datetime >= $2 AND datetime < $3
             ORDER BY datetime, denom",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RewardRow {
                    datetime: from_unix(row.try_get("datetime")?)?,
                    denom: row.try_get("denom")?,
                    components: RewardComponents {
                        tax: row.try_get("tax")?,
                        gas: row.try_get("gas")?,
                        oracle: row.try_get("oracle")?,
                        reward: row.try_get("reward")?,
                        commission: row.try_get("commission")?,
                    },
                })
            })
            .collect()
    }

    async fn staking_samples(
        &self,
        chain_id: &str,
        range: TimeRange,
    ) -> Result<Vec<StakingSample>, DbError> {
        let (from, to) = range.bounds();
        let rows = sqlx::query(
            "SELECT datetime, bonded_tokens, staking_ratio FROM general_info
             WHERE chain_id = $1 AND datetime >= $2 AND datetime < $3
             ORDER BY datetime",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StakingSample {
                    datetime: from_unix(row.try_get("datetime")?)?,
                    bonded_tokens: row.try_get("bonded_tokens")?,
                    staking_ratio: row.try_get("staking_ratio")?,
                })
            })
            .collect()
    }

    async fn daily_prices(
        &self,
        chain_id: &str,
        range: TimeRange,
    ) -> Result<HashMap<(NaiveDate, String), String>, DbError> {
        let (from, to) = range.bounds();
        let rows = sqlx::query(
            "SELECT datetime, denom, price FROM price
             WHERE chain_id = $1 AND datetime >= $2 AND datetime < $3",
        )
        .bind(chain_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut by_day: BTreeMap<(NaiveDate, String), Vec<String>> = BTreeMap::new();
        for row in &rows {
            let date = from_unix(row.try_get("datetime")?)?.date_naive();
            by_day.entry((date, row.try_get("denom")?)).or_default().push(row.try_get("price")?);
        }

        let mut prices = HashMap::new();
        for (key, samples) in by_day {
            if let Some(mean) = math::mean(samples.iter().map(String::as_str))? {
                prices.insert(key, mean);
            }
        }
        Ok(prices)
    }
}
