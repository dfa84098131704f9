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

//! Block reward decomposition and staking return calculation over exact decimals.

pub mod block_reward;
pub mod math;
pub mod staking;

pub use block_reward::{
    decompose_block_rewards, parse_coins, split_denom_and_amount, BlockReward, Coin, DenomMap,
    DenomMapByValidator, RawRewardEvent, RewardKind, RewardParseError,
};

pub use math::DecimalError;

pub use staking::{
    average_staking_by_day, compute_daily_returns, normalize_to_native,
    normalize_validator_earnings, sum_rewards_by_day, DailyReturn, PriceHistory,
    RewardComponents, RewardRow, StakingReturnError, StakingSample, ValidatorEarnings,
};

/// Native staking denom of the columbus networks.
pub const DEFAULT_NATIVE_DENOM: &str = "uluna";
