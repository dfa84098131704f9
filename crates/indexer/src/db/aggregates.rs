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

use chrono::{DateTime, Utc};
use fcd_rewards::{Coin, DenomMap, RewardRow};
use sqlx::AnyConnection;

use super::DbError;

/// Staking snapshot taken once per minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralInfoRecord {
    pub chain_id: String,
    pub datetime: DateTime<Utc>,
    pub height: u64,
    pub bonded_tokens: Option<String>,
    pub not_bonded_tokens: Option<String>,
    pub staking_ratio: Option<String>,
    pub issuance: DenomMap,
}

pub async fn insert_reward_rows(
    conn: &mut AnyConnection,
    chain_id: &str,
    rows: &[RewardRow],
) -> Result<(), DbError> {
    for row in rows {
        let c = &row.components;
        sqlx::query(
            "INSERT INTO reward (chain_id, datetime, denom, tax, gas, oracle, reward, commission)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(chain_id)
        .bind(row.datetime.timestamp())
        .bind(&row.denom)
        .bind(&c.tax)
        .bind(&c.gas)
        .bind(&c.oracle)
        .bind(&c.reward)
        .bind(&c.commission)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn insert_general_info(
    conn: &mut AnyConnection,
    info: &GeneralInfoRecord,
) -> Result<(), DbError> {
    let height = i64::try_from(info.height).map_err(|_| DbError::BadBlockNumb(info.height.to_string()))?;
    sqlx::query(
        "INSERT INTO general_info
            (chain_id, datetime, height, bonded_tokens, not_bonded_tokens, staking_ratio, issuance)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&info.chain_id)
    .bind(info.datetime.timestamp())
    .bind(height)
    .bind(info.bonded_tokens.clone())
    .bind(info.not_bonded_tokens.clone())
    .bind(info.staking_ratio.clone())
    .bind(serde_json::to_string(&info.issuance)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_prices(
    conn: &mut AnyConnection,
    chain_id: &str,
    datetime: DateTime<Utc>,
    prices: &[Coin],
) -> Result<(), DbError> {
    for price in prices {
        sqlx::query(
            "INSERT INTO price (chain_id, datetime, denom, price) VALUES ($1, $2, $3, $4)",
        )
        .bind(chain_id)
        .bind(datetime.timestamp())
        .bind(&price.denom)
        .bind(&price.amount)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
