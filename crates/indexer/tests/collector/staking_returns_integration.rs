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

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use fcd_indexer::{
    db::{aggregates, blocks, BlockRecord, GeneralInfoRecord, IndexerStore},
    staking_return::StakingServiceError,
    StakingReturnService,
};
use fcd_rewards::{
    decompose_block_rewards, DailyReturn, RewardComponents, RewardRow, StakingReturnError,
    ValidatorEarnings,
};

use super::common::{self, coin, commission, reward, TestEnv, CHAIN_ID, OPERATOR};

fn time(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 10, day, hour, 1, 0).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 10, day).unwrap()
}

fn row(day: u32, hour: u32, denom: &str, components: RewardComponents) -> RewardRow {
    RewardRow { datetime: time(day, hour), denom: denom.to_string(), components }
}

fn reward_only(amount: &str) -> RewardComponents {
    RewardComponents { reward: amount.to_string(), ..Default::default() }
}

fn snapshot(day: u32, hour: u32, bonded: Option<&str>, ratio: Option<&str>) -> GeneralInfoRecord {
    GeneralInfoRecord {
        chain_id: CHAIN_ID.to_string(),
        datetime: time(day, hour),
        height: u64::from(day * 100 + hour),
        bonded_tokens: bonded.map(str::to_string),
        not_bonded_tokens: None,
        staking_ratio: ratio.map(str::to_string),
        issuance: Default::default(),
    }
}

async fn seed(env: &TestEnv, rewards: &[RewardRow], snapshots: &[GeneralInfoRecord]) {
    let mut tx = env.db.begin().await.unwrap();
    aggregates::insert_reward_rows(&mut tx, CHAIN_ID, rewards).await.unwrap();
    for info in snapshots {
        aggregates::insert_general_info(&mut tx, info).await.unwrap();
    }
    aggregates::insert_prices(&mut tx, CHAIN_ID, time(1, 0), &[coin("ukrw", "200")]).await.unwrap();
    aggregates::insert_prices(&mut tx, CHAIN_ID, time(1, 12), &[coin("ukrw", "300")]).await.unwrap();
    tx.commit().await.unwrap();
}

async fn seeded_service() -> (TestEnv, StakingReturnService) {
    let env = common::setup().await;
    let rewards = vec![
        row(1, 0, "uluna", reward_only("10")),
        row(1, 10, "uluna", reward_only("5")),
        row(1, 0, "ukrw", reward_only("500")),
        // no price for usdr: skipped
        row(1, 0, "usdr", reward_only("77")),
        row(
            2,
            0,
            "uluna",
            RewardComponents {
                tax: "1".into(),
                gas: "2".into(),
                oracle: "3".into(),
                ..Default::default()
            },
        ),
        row(3, 0, "uluna", reward_only("4")),
        // today, not complete yet
        row(4, 0, "uluna", reward_only("9")),
    ];
    let snapshots = vec![
        snapshot(1, 0, Some("1000"), None),
        snapshot(1, 12, Some("3000"), None),
        snapshot(2, 0, None, Some("0.5")),
        snapshot(3, 0, Some("0"), None),
        snapshot(4, 0, Some("10"), None),
    ];
    seed(&env, &rewards, &snapshots).await;

    let service = StakingReturnService::from_parts(env.chain_obj(), env.db_obj(), CHAIN_ID, "uluna");
    (env, service)
}

#[tokio::test]
async fn test_daily_returns_over_whole_history() {
    let (_env, service) = seeded_service().await;
    let now = Utc.with_ymd_and_hms(2021, 10, 4, 8, 0, 0).unwrap();

    let returns = service.compute_daily_returns_at(now, None).await.unwrap();

    assert_eq!(returns.len(), 2);
    // 15 uluna + 500 ukrw at a mean price of 250
    assert_eq!(returns[&date(1)], DailyReturn { reward: "17".into(), avg_staking: "2000".into() });
    // tax + gas + oracle, staked = issuance * ratio
    assert_eq!(returns[&date(2)], DailyReturn { reward: "6".into(), avg_staking: "500".into() });
    // zero staked: omitted
    assert!(!returns.contains_key(&date(3)));
    assert!(!returns.contains_key(&date(4)));
}

#[tokio::test]
async fn test_daily_returns_limited_to_recent_days() {
    let (_env, service) = seeded_service().await;
    let now = Utc.with_ymd_and_hms(2021, 10, 4, 8, 0, 0).unwrap();

    let returns = service.compute_daily_returns_at(now, Some(2)).await.unwrap();
    assert_eq!(returns.keys().copied().collect::<Vec<_>>(), vec![date(2)]);
}

#[tokio::test]
async fn test_zero_days_before_means_whole_history() {
    let (_env, service) = seeded_service().await;
    let now = Utc.with_ymd_and_hms(2021, 10, 4, 8, 0, 0).unwrap();

    let unlimited = service.compute_daily_returns_at(now, None).await.unwrap();
    let zero = service.compute_daily_returns_at(now, Some(0)).await.unwrap();
    assert_eq!(zero, unlimited);
    assert_eq!(zero.len(), 2);
}

#[tokio::test]
async fn test_day_without_staking_snapshot_fails() {
    let env = common::setup().await;
    seed(&env, &[row(5, 0, "uluna", reward_only("1"))], &[]).await;

    let service = StakingReturnService::from_parts(env.chain_obj(), env.db_obj(), CHAIN_ID, "uluna");
    let now = Utc.with_ymd_and_hms(2021, 10, 6, 0, 0, 0).unwrap();
    let err = service.compute_daily_returns_at(now, None).await.unwrap_err();

    assert!(matches!(
        err,
        StakingServiceError::Calculation(StakingReturnError::MissingStaking(day)) if day == date(5)
    ));
}

#[tokio::test]
async fn test_validator_earnings_in_native_denom() {
    let env = common::setup().await;
    seed(&env, &[], &[]).await;

    let blocks_by_height = [
        (1, time(1, 1), vec![reward(OPERATOR, "10uluna,500ukrw"), commission(OPERATOR, "2uluna")]),
        (2, time(1, 2), vec![reward(OPERATOR, "2uluna"), reward("terravaloper1other", "50uluna")]),
        (3, time(2, 0), vec![reward(OPERATOR, "100uluna")]),
    ];
    let mut tx = env.db.begin().await.unwrap();
    for (height, block_time, events) in blocks_by_height {
        let fact = decompose_block_rewards(&events).unwrap();
        blocks::insert_block_reward(&mut tx, CHAIN_ID, height, block_time, &fact).await.unwrap();
        let record = BlockRecord {
            chain_id: CHAIN_ID.to_string(),
            height,
            time: block_time,
            proposer: OPERATOR.to_string(),
            tx_count: 0,
        };
        blocks::insert_block(&mut tx, &record).await.unwrap();
    }
    tx.commit().await.unwrap();

    let service = StakingReturnService::from_parts(env.chain_obj(), env.db_obj(), CHAIN_ID, "uluna");

    // 12 uluna + 500 ukrw at the day's mean price of 250
    let earnings = service.validator_earnings(OPERATOR, date(1)).await.unwrap();
    assert_eq!(earnings, ValidatorEarnings { reward: "14".into(), commission: "2".into() });

    let next_day = service.validator_earnings(OPERATOR, date(2)).await.unwrap();
    assert_eq!(next_day, ValidatorEarnings { reward: "100".into(), commission: "0".into() });
}
