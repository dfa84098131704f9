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

//! Daily nominal staking return computation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    block_reward::DenomMap,
    math::{self, DecimalError},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingReturnError {
    #[error(transparent)]
    Decimal(#[from] DecimalError),

    #[error("no staking snapshot recorded for {0}")]
    MissingStaking(NaiveDate),
}

/// Summable reward components of one denom over some period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardComponents {
    pub tax: String,
    pub gas: String,
    pub oracle: String,
    pub reward: String,
    pub commission: String,
}

impl Default for RewardComponents {
    fn default() -> Self {
        let zero = || "0".to_string();
        Self { tax: zero(), gas: zero(), oracle: zero(), reward: zero(), commission: zero() }
    }
}

impl RewardComponents {
    fn add(&mut self, other: &RewardComponents) -> Result<(), DecimalError> {
        math::accumulate(&mut self.tax, &other.tax)?;
        math::accumulate(&mut self.gas, &other.gas)?;
        math::accumulate(&mut self.oracle, &other.oracle)?;
        math::accumulate(&mut self.reward, &other.reward)?;
        math::accumulate(&mut self.commission, &other.commission)?;
        Ok(())
    }

    fn try_map<F>(&self, f: F) -> Result<Self, DecimalError>
    where
        F: Fn(&str) -> Result<String, DecimalError>,
    {
        Ok(Self {
            tax: f(&self.tax)?,
            gas: f(&self.gas)?,
            oracle: f(&self.oracle)?,
            reward: f(&self.reward)?,
            commission: f(&self.commission)?,
        })
    }
}

/// One persisted reward row (a minute window of one denom).
#[derive(Debug, Clone)]
pub struct RewardRow {
    pub datetime: DateTime<Utc>,
    pub denom: String,
    pub components: RewardComponents,
}

/// One persisted staking snapshot.
#[derive(Debug, Clone)]
pub struct StakingSample {
    pub datetime: DateTime<Utc>,
    pub bonded_tokens: Option<String>,
    pub staking_ratio: Option<String>,
}

/// Staking return of one calendar day, in native denom units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReturn {
    pub reward: String,
    #[serde(rename = "avgStaking")]
    pub avg_staking: String,
}

/// Historical price lookup: units of `denom` per one unit of the native denom, for a day.
pub trait PriceHistory {
    fn price(&self, date: NaiveDate, denom: &str) -> Option<&str>;
}

impl PriceHistory for HashMap<(NaiveDate, String), String> {
    fn price(&self, date: NaiveDate, denom: &str) -> Option<&str> {
        self.get(&(date, denom.to_string())).map(String::as_str)
    }
}

/// Reward and commission earned by one validator, in native denom units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEarnings {
    pub reward: String,
    pub commission: String,
}

/// Price of `denom` on `date`, treating zero as unknown.
fn usable_price<'a, P: PriceHistory>(
    prices: &'a P,
    date: NaiveDate,
    denom: &str,
) -> Result<Option<&'a str>, DecimalError> {
    match prices.price(date, denom) {
        Some(price) if !math::is_zero(price)? => Ok(Some(price)),
        _ => Ok(None),
    }
}

/// Sum per-denom amounts into one native denom amount using the prices of `date`.
///
/// Non-native denoms without a usable price are skipped.
pub fn normalize_to_native<P: PriceHistory>(
    amounts: &DenomMap,
    date: NaiveDate,
    prices: &P,
    native_denom: &str,
) -> Result<String, DecimalError> {
    let mut total = "0".to_string();
    for (denom, amount) in amounts {
        if denom == native_denom {
            math::accumulate(&mut total, amount)?;
            continue;
        }
        match usable_price(prices, date, denom)? {
            Some(price) => math::accumulate(&mut total, &math::div(amount, price)?)?,
            None => tracing::debug!("No price for {} on {}, skipping", denom, date),
        }
    }
    Ok(total)
}

pub fn normalize_validator_earnings<P: PriceHistory>(
    reward: &DenomMap,
    commission: &DenomMap,
    date: NaiveDate,
    prices: &P,
    native_denom: &str,
) -> Result<ValidatorEarnings, DecimalError> {
    Ok(ValidatorEarnings {
        reward: normalize_to_native(reward, date, prices, native_denom)?,
        commission: normalize_to_native(commission, date, prices, native_denom)?,
    })
}

/// Group reward rows by UTC calendar day and denom, summing every component exactly.
pub fn sum_rewards_by_day(
    rows: &[RewardRow],
) -> Result<BTreeMap<(NaiveDate, String), RewardComponents>, DecimalError> {
    let mut by_day: BTreeMap<(NaiveDate, String), RewardComponents> = BTreeMap::new();
    for row in rows {
        by_day
            .entry((row.datetime.date_naive(), row.denom.clone()))
            .or_default()
            .add(&row.components)?;
    }
    Ok(by_day)
}

/// Average staked amount per day.
///
/// Uses the mean bonded-token amount when the day has any, otherwise estimates it as
/// `issuance * mean staking ratio`. Days with neither are absent from the result.
pub fn average_staking_by_day(
    samples: &[StakingSample],
    issuance: &str,
) -> Result<BTreeMap<NaiveDate, String>, DecimalError> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&StakingSample>> = BTreeMap::new();
    for sample in samples {
        by_day.entry(sample.datetime.date_naive()).or_default().push(sample);
    }

    let mut averages = BTreeMap::new();
    for (date, day_samples) in by_day {
        let bonded = math::mean(day_samples.iter().filter_map(|s| s.bonded_tokens.as_deref()))?;
        let staked = match bonded {
            Some(bonded) => bonded,
            None => match math::mean(day_samples.iter().filter_map(|s| s.staking_ratio.as_deref()))? {
                Some(ratio) => math::times(issuance, &ratio)?,
                None => continue,
            },
        };
        averages.insert(date, staked);
    }
    Ok(averages)
}

/// Produce the daily staking return series.
///
/// Non-native denoms are converted with that day's price and skipped when no usable price
/// exists. Days whose average staked amount is zero are omitted.
pub fn compute_daily_returns<P: PriceHistory>(
    rewards_by_day: &BTreeMap<(NaiveDate, String), RewardComponents>,
    staked_by_day: &BTreeMap<NaiveDate, String>,
    prices: &P,
    native_denom: &str,
) -> Result<BTreeMap<NaiveDate, DailyReturn>, StakingReturnError> {
    let mut native_by_day: BTreeMap<NaiveDate, RewardComponents> = BTreeMap::new();

    for ((date, denom), components) in rewards_by_day {
        let converted = if denom == native_denom {
            components.clone()
        } else {
            let price = match usable_price(prices, *date, denom)? {
                Some(price) => price,
                None => {
                    tracing::debug!("No price for {} on {}, skipping", denom, date);
                    continue;
                }
            };
            components.try_map(|amount| math::div(amount, price))?
        };
        native_by_day.entry(*date).or_default().add(&converted)?;
    }

    let mut returns = BTreeMap::new();
    for (date, components) in native_by_day {
        let staked = staked_by_day.get(&date).ok_or(StakingReturnError::MissingStaking(date))?;
        if math::is_zero(staked)? {
            tracing::debug!("Zero staked amount on {}, omitting", date);
            continue;
        }

        let reward = if math::is_zero(&components.reward)? {
            math::sum([components.tax.as_str(), components.gas.as_str(), components.oracle.as_str()])?
        } else {
            components.reward
        };

        returns.insert(date, DailyReturn { reward, avg_staking: staked.clone() });
    }

    Ok(returns)
}
