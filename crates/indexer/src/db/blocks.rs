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
use fcd_rewards::{math, BlockReward, DenomMap, DenomMapByValidator};
use sqlx::{AnyConnection, Row};

use super::{from_unix_nanos, to_unix_nanos, DbError};

/// Position and time of a committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedBlock {
    pub height: u64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub chain_id: String,
    pub height: u64,
    pub time: DateTime<Utc>,
    /// Operator address of the proposer.
    pub proposer: String,
    pub tx_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub chain_id: String,
    pub hash: String,
    pub height: u64,
    pub index: usize,
    pub time: DateTime<Utc>,
}

/// Reward and commission totals of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardTotals {
    pub reward: DenomMap,
    pub commission: DenomMap,
}

fn height_param(height: u64) -> Result<i64, DbError> {
    i64::try_from(height).map_err(|_| DbError::BadBlockNumb(height.to_string()))
}

pub async fn last_indexed_block(
    conn: &mut AnyConnection,
    chain_id: &str,
) -> Result<Option<IndexedBlock>, DbError> {
    let row = sqlx::query(
        "SELECT height, block_time FROM block WHERE chain_id = $1 ORDER BY height DESC LIMIT 1",
    )
    .bind(chain_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let height: i64 = row.try_get("height")?;
    Ok(Some(IndexedBlock {
        height: u64::try_from(height).map_err(|_| DbError::BadBlockNumb(height.to_string()))?,
        time: from_unix_nanos(row.try_get("block_time")?)?,
    }))
}

pub async fn insert_block_reward(
    conn: &mut AnyConnection,
    chain_id: &str,
    height: u64,
    time: DateTime<Utc>,
    reward: &BlockReward,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO block_reward
            (chain_id, height, block_time, reward, commission, reward_per_val, commission_per_val)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(chain_id)
    .bind(height_param(height)?)
    .bind(to_unix_nanos(time)?)
    .bind(serde_json::to_string(&reward.reward)?)
    .bind(serde_json::to_string(&reward.commission)?)
    .bind(serde_json::to_string(&reward.reward_per_val)?)
    .bind(serde_json::to_string(&reward.commission_per_val)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_block(conn: &mut AnyConnection, block: &BlockRecord) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO block (chain_id, height, block_time, proposer, tx_count)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&block.chain_id)
    .bind(height_param(block.height)?)
    .bind(to_unix_nanos(block.time)?)
    .bind(&block.proposer)
    .bind(block.tx_count as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_txs(conn: &mut AnyConnection, txs: &[TxRecord]) -> Result<(), DbError> {
    for tx in txs {
        sqlx::query(
            "INSERT INTO tx (chain_id, hash, height, tx_index, block_time)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&tx.chain_id)
        .bind(&tx.hash)
        .bind(height_param(tx.height)?)
        .bind(tx.index as i64)
        .bind(to_unix_nanos(tx.time)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Totals of every block with a time in `[from, to)`.
pub async fn reward_totals_between(
    conn: &mut AnyConnection,
    chain_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<RewardTotals>, DbError> {
    let rows = sqlx::query(
        "SELECT reward, commission FROM block_reward
         WHERE chain_id = $1 AND block_time >= $2 AND block_time < $3
         ORDER BY height",
    )
    .bind(chain_id)
    .bind(to_unix_nanos(from)?)
    .bind(to_unix_nanos(to)?)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let reward: String = row.try_get("reward")?;
            let commission: String = row.try_get("commission")?;
            Ok(RewardTotals {
                reward: serde_json::from_str(&reward)?,
                commission: serde_json::from_str(&commission)?,
            })
        })
        .collect()
}

/// Reward and commission of one validator summed over the committed blocks with a time in
/// `[from, to)`.
pub async fn validator_reward_totals_between(
    conn: &mut AnyConnection,
    chain_id: &str,
    operator: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<RewardTotals, DbError> {
    let rows = sqlx::query(
        "SELECT r.reward_per_val, r.commission_per_val FROM block_reward r
         JOIN block b ON b.chain_id = r.chain_id AND b.height = r.height
         WHERE r.chain_id = $1 AND r.block_time >= $2 AND r.block_time < $3",
    )
    .bind(chain_id)
    .bind(to_unix_nanos(from)?)
    .bind(to_unix_nanos(to)?)
    .fetch_all(&mut *conn)
    .await?;

    let mut totals = RewardTotals::default();
    for row in &rows {
        let reward_per_val: DenomMapByValidator =
            serde_json::from_str(&row.try_get::<String, _>("reward_per_val")?)?;
        let commission_per_val: DenomMapByValidator =
            serde_json::from_str(&row.try_get::<String, _>("commission_per_val")?)?;
        add_operator_amounts(&mut totals.reward, &reward_per_val, operator)?;
        add_operator_amounts(&mut totals.commission, &commission_per_val, operator)?;
    }
    Ok(totals)
}

fn add_operator_amounts(
    totals: &mut DenomMap,
    per_validator: &DenomMapByValidator,
    operator: &str,
) -> Result<(), DbError> {
    for (denom, amount) in per_validator.get(operator).into_iter().flatten() {
        math::accumulate(totals.entry(denom.clone()).or_default(), amount)?;
    }
    Ok(())
}

/// Stored reward fact of one block.
pub async fn block_reward(
    conn: &mut AnyConnection,
    chain_id: &str,
    height: u64,
) -> Result<Option<BlockReward>, DbError> {
    let row = sqlx::query(
        "SELECT reward, commission, reward_per_val, commission_per_val FROM block_reward
         WHERE chain_id = $1 AND height = $2",
    )
    .bind(chain_id)
    .bind(height_param(height)?)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let column = |name: &str| -> Result<String, DbError> { Ok(row.try_get::<String, _>(name)?) };
    Ok(Some(BlockReward {
        reward: serde_json::from_str(&column("reward")?)?,
        commission: serde_json::from_str(&column("commission")?)?,
        reward_per_val: serde_json::from_str(&column("reward_per_val")?)?,
        commission_per_val: serde_json::from_str(&column("commission_per_val")?)?,
    }))
}

/// Heights of the committed blocks of a chain, ascending.
pub async fn indexed_heights(conn: &mut AnyConnection, chain_id: &str) -> Result<Vec<u64>, DbError> {
    let rows = sqlx::query("SELECT height FROM block WHERE chain_id = $1 ORDER BY height")
        .bind(chain_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            let height: i64 = row.try_get("height")?;
            u64::try_from(height).map_err(|_| DbError::BadBlockNumb(height.to_string()))
        })
        .collect()
}
