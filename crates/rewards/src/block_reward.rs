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

//! Decomposition of per-validator reward and commission events into block totals.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{self, DecimalError};

/// Amount by denomination.
pub type DenomMap = BTreeMap<String, String>;

/// Amount by denomination, by validator operator address.
pub type DenomMapByValidator = BTreeMap<String, DenomMap>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewardParseError {
    #[error("malformed amount token {token:?} for validator {validator}")]
    MalformedToken { validator: String, token: String },

    #[error("unknown reward event type: {0}")]
    UnknownKind(String),

    #[error(transparent)]
    Decimal(#[from] DecimalError),
}

/// A single denominated amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Rewards,
    Commission,
}

impl FromStr for RewardKind {
    type Err = RewardParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rewards" => Ok(Self::Rewards),
            "commission" => Ok(Self::Commission),
            other => Err(RewardParseError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewards => f.write_str("rewards"),
            Self::Commission => f.write_str("commission"),
        }
    }
}

/// Raw distribution event emitted by the chain for one validator at one height.
///
/// `amount` uses the chain's coin list format: `"<amount><denom>,<amount><denom>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRewardEvent {
    pub validator: String,
    pub kind: RewardKind,
    pub amount: String,
}

/// Rewards and commissions of one block, in total and per validator.
///
/// Every total equals the sum of the matching per-validator entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReward {
    pub reward: DenomMap,
    pub commission: DenomMap,
    pub reward_per_val: DenomMapByValidator,
    pub commission_per_val: DenomMapByValidator,
}

/// Split a token such as `"1234.5uluna"` into its amount and trailing alphabetic denom.
pub fn split_denom_and_amount(token: &str) -> Option<Coin> {
    let token = token.trim();
    let denom_start = token
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphabetic())
        .last()
        .map(|(idx, _)| idx)?;
    let (amount, denom) = token.split_at(denom_start);
    math::parse(amount).ok()?;
    Some(Coin { denom: denom.to_string(), amount: amount.to_string() })
}

/// Parse a comma separated coin list.
pub fn parse_coins(validator: &str, amounts: &str) -> Result<Vec<Coin>, RewardParseError> {
    amounts
        .split(',')
        .map(|token| {
            split_denom_and_amount(token).ok_or_else(|| RewardParseError::MalformedToken {
                validator: validator.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

/// Build the [BlockReward] of one block from its raw distribution events.
///
/// Events with an empty amount carry nothing and are skipped; any other token that does
/// not parse fails the whole block.
pub fn decompose_block_rewards(events: &[RawRewardEvent]) -> Result<BlockReward, RewardParseError> {
    let mut block_reward = BlockReward::default();

    for event in events {
        if event.amount.trim().is_empty() {
            continue;
        }

        let coins = parse_coins(&event.validator, &event.amount)?;
        let (totals, per_validator) = match event.kind {
            RewardKind::Rewards => (&mut block_reward.reward, &mut block_reward.reward_per_val),
            RewardKind::Commission => {
                (&mut block_reward.commission, &mut block_reward.commission_per_val)
            }
        };

        for coin in coins {
            math::accumulate(totals.entry(coin.denom.clone()).or_default(), &coin.amount)?;
            let validator_map = per_validator.entry(event.validator.clone()).or_default();
            math::accumulate(validator_map.entry(coin.denom).or_default(), &coin.amount)?;
        }
    }

    tracing::trace!(
        "Decomposed {} reward events into {} reward and {} commission denoms",
        events.len(),
        block_reward.reward.len(),
        block_reward.commission.len()
    );

    Ok(block_reward)
}

impl BlockReward {
    /// Check that every total equals the sum of its per-validator entries, with exact
    /// decimal equality, and that no denom appears on only one side.
    pub fn totals_match(&self) -> Result<bool, DecimalError> {
        Ok(totals_match(&self.reward, &self.reward_per_val)?
            && totals_match(&self.commission, &self.commission_per_val)?)
    }

    pub fn is_empty(&self) -> bool {
        self.reward.is_empty() && self.commission.is_empty()
    }
}

fn totals_match(totals: &DenomMap, per_validator: &DenomMapByValidator) -> Result<bool, DecimalError> {
    let mut summed = DenomMap::new();
    for denoms in per_validator.values() {
        for (denom, amount) in denoms {
            math::accumulate(summed.entry(denom.clone()).or_default(), amount)?;
        }
    }

    if summed.len() != totals.len() {
        return Ok(false);
    }
    for (denom, total) in totals {
        match summed.get(denom) {
            Some(sum) if math::parse(sum)? == math::parse(total)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}
