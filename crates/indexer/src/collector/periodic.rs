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

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use fcd_rewards::{math, DenomMap, RewardComponents, RewardRow};
use sqlx::AnyConnection;

use crate::{
    db::{aggregates, blocks, GeneralInfoRecord},
    lcd::ChainReaderObj,
};

/// Job run once per elapsed minute of chain time, inside the atomic unit of the block
/// that crossed the minute boundary.
#[async_trait]
pub trait PeriodicCollector: Send + Sync {
    fn name(&self) -> &'static str;

    /// `window_end` is the start of the minute the triggering block belongs to.
    async fn run(
        &self,
        conn: &mut AnyConnection,
        window_end: DateTime<Utc>,
        height: u64,
    ) -> Result<()>;
}

/// Start of the minute `time` falls in.
pub fn truncate_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(Duration::minutes(1)).unwrap_or(time)
}

/// Window end for periodic collectors when a block at `current` follows one at `previous`.
///
/// `None` when both fall in the same minute, or when there is no previous block.
pub fn minute_window(
    previous: Option<DateTime<Utc>>,
    current: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let current_minute = truncate_to_minute(current);
    match previous {
        Some(previous) if truncate_to_minute(previous) != current_minute => Some(current_minute),
        _ => None,
    }
}

/// Sums the block reward totals of the elapsed minute into per-denom reward rows.
pub struct RewardWindowCollector {
    chain_id: String,
}

impl RewardWindowCollector {
    pub fn new(chain_id: &str) -> Self {
        Self { chain_id: chain_id.to_string() }
    }
}

#[async_trait]
impl PeriodicCollector for RewardWindowCollector {
    fn name(&self) -> &'static str {
        "reward"
    }

    async fn run(
        &self,
        conn: &mut AnyConnection,
        window_end: DateTime<Utc>,
        height: u64,
    ) -> Result<()> {
        let window_start = window_end - Duration::minutes(1);
        let totals =
            blocks::reward_totals_between(conn, &self.chain_id, window_start, window_end).await?;

        let mut by_denom: BTreeMap<String, RewardComponents> = BTreeMap::new();
        for block in &totals {
            for (denom, amount) in &block.reward {
                math::accumulate(&mut by_denom.entry(denom.clone()).or_default().reward, amount)?;
            }
            for (denom, amount) in &block.commission {
                math::accumulate(
                    &mut by_denom.entry(denom.clone()).or_default().commission,
                    amount,
                )?;
            }
        }

        let rows: Vec<RewardRow> = by_denom
            .into_iter()
            .map(|(denom, components)| RewardRow { datetime: window_start, denom, components })
            .collect();

        tracing::debug!(
            "Reward window {} at height {}: {} blocks, {} denoms",
            window_start,
            height,
            totals.len(),
            rows.len()
        );
        aggregates::insert_reward_rows(conn, &self.chain_id, &rows).await?;
        Ok(())
    }
}

/// Records a staking snapshot: bonded tokens, issuance and the resulting staking ratio.
pub struct GeneralInfoCollector {
    chain: ChainReaderObj,
    chain_id: String,
    native_denom: String,
}

impl GeneralInfoCollector {
    pub fn new(chain: ChainReaderObj, chain_id: &str, native_denom: &str) -> Self {
        Self { chain, chain_id: chain_id.to_string(), native_denom: native_denom.to_string() }
    }
}

#[async_trait]
impl PeriodicCollector for GeneralInfoCollector {
    fn name(&self) -> &'static str {
        "general"
    }

    async fn run(
        &self,
        conn: &mut AnyConnection,
        window_end: DateTime<Utc>,
        height: u64,
    ) -> Result<()> {
        let pool = self.chain.staking_pool(Some(height)).await.context("Failed to fetch staking pool")?;
        let supply = self.chain.total_supply(Some(height)).await.context("Failed to fetch supply")?;
        let issuance: DenomMap = supply.into_iter().map(|c| (c.denom, c.amount)).collect();

        let bonded_tokens = pool.as_ref().map(|p| p.bonded_tokens.clone());
        let staking_ratio = match (&bonded_tokens, issuance.get(&self.native_denom)) {
            (Some(bonded), Some(total)) if !math::is_zero(total)? => Some(math::div(bonded, total)?),
            _ => None,
        };

        let record = GeneralInfoRecord {
            chain_id: self.chain_id.clone(),
            datetime: window_end,
            height,
            bonded_tokens,
            not_bonded_tokens: pool.map(|p| p.not_bonded_tokens),
            staking_ratio,
            issuance,
        };
        aggregates::insert_general_info(conn, &record).await?;
        Ok(())
    }
}

/// Records the oracle exchange rate of every denom.
pub struct PriceCollector {
    chain: ChainReaderObj,
    chain_id: String,
}

impl PriceCollector {
    pub fn new(chain: ChainReaderObj, chain_id: &str) -> Self {
        Self { chain, chain_id: chain_id.to_string() }
    }
}

#[async_trait]
impl PeriodicCollector for PriceCollector {
    fn name(&self) -> &'static str {
        "price"
    }

    async fn run(
        &self,
        conn: &mut AnyConnection,
        window_end: DateTime<Utc>,
        height: u64,
    ) -> Result<()> {
        let prices =
            self.chain.oracle_prices(Some(height)).await.context("Failed to fetch oracle prices")?;
        aggregates::insert_prices(conn, &self.chain_id, window_end, &prices).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 10, 1, hour, min, sec).unwrap()
    }

    #[test]
    fn test_minute_window_fires_once_per_minute() {
        let times = [at(12, 0, 30), at(12, 0, 45), at(12, 1, 10), at(12, 1, 59), at(12, 2, 5)];

        let mut previous = None;
        let mut windows = Vec::new();
        for time in times {
            if let Some(window_end) = minute_window(previous, time) {
                windows.push((time, window_end));
            }
            previous = Some(time);
        }

        assert_eq!(windows, vec![(at(12, 1, 10), at(12, 1, 0)), (at(12, 2, 5), at(12, 2, 0))]);
    }

    #[test]
    fn test_minute_window_across_hours() {
        // same minute-of-hour, different hour
        assert_eq!(minute_window(Some(at(11, 5, 0)), at(12, 5, 0)), Some(at(12, 5, 0)));
        assert_eq!(minute_window(None, at(12, 5, 0)), None);
    }

    #[test]
    fn test_truncate_to_minute_drops_subseconds() {
        let time = at(12, 3, 59) + Duration::milliseconds(999);
        assert_eq!(truncate_to_minute(time), at(12, 3, 0));
    }
}
