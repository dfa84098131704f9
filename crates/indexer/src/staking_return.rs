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

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use fcd_rewards::{
    average_staking_by_day, compute_daily_returns, normalize_validator_earnings,
    sum_rewards_by_day, DailyReturn, DecimalError, StakingReturnError, ValidatorEarnings,
};
use thiserror::Error;

use crate::{
    db::{DbError, IndexerDb, IndexerDbObj, TimeRange},
    lcd::{ChainReaderObj, LcdClient, LcdClientConfig, LcdError},
};

#[derive(Error, Debug)]
pub enum StakingServiceError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("chain read error: {0}")]
    Lcd(#[from] LcdError),

    #[error("no issuance reported for {0}")]
    MissingIssuance(String),

    #[error(transparent)]
    Calculation(#[from] StakingReturnError),

    #[error(transparent)]
    Decimal(#[from] DecimalError),
}

/// Daily nominal staking return over the persisted reward, staking and price history.
pub struct StakingReturnService {
    chain: ChainReaderObj,
    db: IndexerDbObj,
    chain_id: String,
    native_denom: String,
}

impl StakingReturnService {
    pub async fn new(
        lcd_config: LcdClientConfig,
        db_conn: &str,
        chain_id: &str,
        native_denom: &str,
    ) -> anyhow::Result<Self> {
        let chain: ChainReaderObj = Arc::new(LcdClient::new(lcd_config)?);
        let db: IndexerDbObj = Arc::new(IndexerDb::new(db_conn).await?);
        Ok(Self::from_parts(chain, db, chain_id, native_denom))
    }

    pub fn from_parts(chain: ChainReaderObj, db: IndexerDbObj, chain_id: &str, native_denom: &str) -> Self {
        Self { chain, db, chain_id: chain_id.to_string(), native_denom: native_denom.to_string() }
    }

    pub async fn compute_daily_returns(
        &self,
        days_before: Option<u32>,
    ) -> Result<BTreeMap<NaiveDate, DailyReturn>, StakingServiceError> {
        self.compute_daily_returns_at(Utc::now(), days_before).await
    }

    /// Returns for the complete days before `now`, limited to the last `days_before` days.
    /// Zero days means no limit.
    pub async fn compute_daily_returns_at(
        &self,
        now: DateTime<Utc>,
        days_before: Option<u32>,
    ) -> Result<BTreeMap<NaiveDate, DailyReturn>, StakingServiceError> {
        let start_of_today = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
        let range = TimeRange {
            from: days_before
                .filter(|days| *days > 0)
                .map(|days| start_of_today - Duration::days(i64::from(days))),
            to: start_of_today,
        };

        let reward_rows = self.db.reward_rows(&self.chain_id, range).await?;
        let samples = self.db.staking_samples(&self.chain_id, range).await?;
        let prices = self.db.daily_prices(&self.chain_id, range).await?;

        let supply = self.chain.total_supply(None).await?;
        let issuance = supply
            .into_iter()
            .find(|c| c.denom == self.native_denom)
            .map(|c| c.amount)
            .ok_or_else(|| StakingServiceError::MissingIssuance(self.native_denom.clone()))?;

        let rewards_by_day = sum_rewards_by_day(&reward_rows)?;
        let staked_by_day = average_staking_by_day(&samples, &issuance)?;
        let returns = compute_daily_returns(&rewards_by_day, &staked_by_day, &prices, &self.native_denom)?;

        tracing::info!(
            "Computed {} daily returns from {} reward rows and {} staking samples",
            returns.len(),
            reward_rows.len(),
            samples.len()
        );
        Ok(returns)
    }

    /// Reward and commission of one validator on `date`, converted to the native denom with
    /// that day's mean prices.
    pub async fn validator_earnings(
        &self,
        operator: &str,
        date: NaiveDate,
    ) -> Result<ValidatorEarnings, StakingServiceError> {
        let from = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let to = from + Duration::days(1);

        let totals = self.db.validator_reward_totals(&self.chain_id, operator, from, to).await?;
        let prices = self.db.daily_prices(&self.chain_id, TimeRange { from: Some(from), to }).await?;

        Ok(normalize_validator_earnings(
            &totals.reward,
            &totals.commission,
            date,
            &prices,
            &self.native_denom,
        )?)
    }
}
