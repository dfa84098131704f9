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

use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use fcd_indexer::{
    collector::{CollectorError, PeriodicCollector},
    db::{aggregates, blocks, IndexerStore},
    validators::ResolveError,
    SyncState,
};
use sqlx::{AnyConnection, Row};

use super::common::{self, at, coin, commission, reward, CHAIN_ID, OPERATOR, PROPOSER_HEX};

type Invocations = Arc<Mutex<Vec<(DateTime<Utc>, u64)>>>;

/// Records every invocation.
struct RecordingCollector {
    invocations: Invocations,
}

#[async_trait]
impl PeriodicCollector for RecordingCollector {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn run(&self, _conn: &mut AnyConnection, window_end: DateTime<Utc>, height: u64) -> anyhow::Result<()> {
        self.invocations.lock().unwrap().push((window_end, height));
        Ok(())
    }
}

/// Writes a row, then fails at one height.
struct FailingCollector {
    fail_at: u64,
}

#[async_trait]
impl PeriodicCollector for FailingCollector {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn run(&self, conn: &mut AnyConnection, window_end: DateTime<Utc>, height: u64) -> anyhow::Result<()> {
        aggregates::insert_prices(conn, CHAIN_ID, window_end, &[coin("ukrw", "1")]).await?;
        if height == self.fail_at {
            bail!("simulated failure at height {}", height);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_resumes_after_last_indexed_height() {
    let env = common::setup().await;
    env.add_blocks(1..=95, at(12, 0, 0), 6);
    env.chain.set_head(95);

    let mut service = env.service();
    let report = service.run().await.unwrap();
    assert_eq!(report.blocks_indexed, 95);
    assert_eq!(report.next_height, 96);

    env.add_blocks(96..=100, at(12, 9, 30), 6);
    env.chain.set_head(100);

    // a fresh service only knows what the database knows
    let mut service = env.service();
    let report = service.run().await.unwrap();

    assert_eq!(report.state, SyncState::IdleCaughtUp);
    assert_eq!(report.latest_height, 100);
    assert_eq!(report.blocks_indexed, 5);
    assert_eq!(report.next_height, 101);
    assert!(!report.pruned);
    assert_eq!(service.state(), SyncState::IdleCaughtUp);

    let mut conn = env.db.pool().acquire().await.unwrap();
    assert_eq!(blocks::indexed_heights(&mut conn, CHAIN_ID).await.unwrap(), (1..=100).collect::<Vec<_>>());
    assert_eq!(env.count("block").await, 100);
    assert_eq!(env.count("block_reward").await, 100);

    let block_100 = sqlx::query("SELECT proposer FROM block WHERE chain_id = $1 AND height = $2")
        .bind(CHAIN_ID)
        .bind(100i64)
        .fetch_one(env.db.pool())
        .await
        .unwrap();
    assert_eq!(block_100.try_get::<String, _>("proposer").unwrap(), OPERATOR);
}

#[tokio::test]
async fn test_stops_when_head_block_not_served() {
    let env = common::setup().await;
    env.add_blocks(1..=3, at(12, 0, 0), 6);
    // the node reports a head it cannot serve yet
    env.add_blocks(4..=4, at(12, 0, 18), 6);
    env.chain.set_head(4);
    env.chain.remove_block(4);

    let mut service = env.service();
    let report = service.run().await.unwrap();
    assert_eq!(report.state, SyncState::IdleCaughtUp);
    assert_eq!(report.blocks_indexed, 3);
    assert_eq!(report.next_height, 4);
    assert_eq!(env.db.last_indexed_block(CHAIN_ID).await.unwrap().unwrap().height, 3);
}

#[tokio::test]
async fn test_minute_boundary_triggers_periodic_collectors() {
    let env = common::setup().await;
    let times = [at(12, 0, 30), at(12, 0, 45), at(12, 1, 10), at(12, 1, 59), at(12, 2, 5)];
    for (i, time) in times.iter().enumerate() {
        let height = i as u64 + 1;
        env.chain.add_block(height, *time, PROPOSER_HEX, vec![]);
    }
    env.chain.set_head(5);

    let invocations = Invocations::default();
    let mut service = env
        .service()
        .with_periodic_collector(Box::new(RecordingCollector { invocations: invocations.clone() }));
    service.run().await.unwrap();

    assert_eq!(*invocations.lock().unwrap(), vec![(at(12, 1, 0), 3), (at(12, 2, 0), 5)]);
}

#[tokio::test]
async fn test_failed_block_is_rolled_back() {
    let env = common::setup().await;
    // minute boundary crossed at heights 2 and 5
    env.add_blocks(1..=6, at(12, 0, 40), 20);
    env.chain.set_head(6);

    let mut service = env.service().with_periodic_collector(Box::new(FailingCollector { fail_at: 5 }));
    let err = service.run().await.unwrap_err();

    assert!(matches!(err, CollectorError::Collaborator(_)));
    assert!(!err.is_pruned());
    assert_eq!(service.state(), SyncState::HaltedOnError);

    let last = env.db.last_indexed_block(CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(last.height, 4);
    assert_eq!(env.count("block").await, 4);
    assert_eq!(env.count("block_reward").await, 4);
    // only the write from height 2 survives
    assert_eq!(env.count("price").await, 1);

    // the next pass retries the failed height
    let mut service = env.service();
    let report = service.run().await.unwrap();
    assert_eq!(report.blocks_indexed, 2);
    assert_eq!(report.next_height, 7);
}

#[tokio::test]
async fn test_pruned_data_stops_cleanly() {
    let env = common::setup().await;
    env.add_blocks(1..=5, at(12, 0, 0), 6);
    env.chain.set_head(5);
    env.chain.prune(3);

    let mut service = env.service();
    let report = service.run().await.unwrap();

    assert!(report.pruned);
    assert_eq!(report.state, SyncState::IdleCaughtUp);
    assert_eq!(report.blocks_indexed, 2);
    assert_eq!(report.next_height, 3);
    assert_eq!(env.count("block").await, 2);
}

#[tokio::test]
async fn test_unknown_proposer_halts() {
    let env = common::setup().await;
    env.add_blocks(1..=2, at(12, 0, 0), 6);
    env.chain.add_block(3, at(12, 0, 12), "0A1B2C3D4E5F60718293A4B5C6D7E8F901234567", vec![]);
    env.chain.set_head(3);

    let mut service = env.service();
    let err = service.run().await.unwrap_err();

    match err {
        CollectorError::Resolution(ResolveError::NotFound { hex_address, height }) => {
            assert_eq!(hex_address, "0A1B2C3D4E5F60718293A4B5C6D7E8F901234567");
            assert_eq!(height, 3);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(env.count("block").await, 2);
    assert_eq!(env.count("block_reward").await, 2);
}

#[tokio::test]
async fn test_malformed_reward_halts() {
    let env = common::setup().await;
    env.add_blocks(1..=2, at(12, 0, 0), 6);
    env.chain.set_reward_events(2, vec![reward(OPERATOR, "1uluna,garbage")]);
    env.chain.set_head(2);

    let err = env.service().run().await.unwrap_err();
    assert!(matches!(err, CollectorError::Parse { height: 2, .. }));
    assert_eq!(env.count("block").await, 1);
}

#[tokio::test]
async fn test_block_transactions_are_collected() {
    let env = common::setup().await;
    env.add_blocks(1..=1, at(12, 0, 0), 6);
    let txs = vec![BASE64.encode(b"first"), BASE64.encode(b"second")];
    env.chain.add_block(2, at(12, 0, 6), PROPOSER_HEX, txs.clone());
    env.chain.set_head(2);

    env.service().run().await.unwrap();

    let rows = sqlx::query("SELECT hash, tx_index FROM tx WHERE chain_id = $1 ORDER BY tx_index")
        .bind(CHAIN_ID)
        .fetch_all(env.db.pool())
        .await
        .unwrap();
    let hashes: Vec<String> = rows.iter().map(|r| r.try_get("hash").unwrap()).collect();
    let expected: Vec<String> = txs.iter().map(|tx| fcd_indexer::lcd::tx_hash(tx).unwrap()).collect();
    assert_eq!(hashes, expected);

    let tx_count: i64 = sqlx::query("SELECT tx_count FROM block WHERE height = 2")
        .fetch_one(env.db.pool())
        .await
        .unwrap()
        .try_get("tx_count")
        .unwrap();
    assert_eq!(tx_count, 2);
}

#[tokio::test]
async fn test_default_collectors_aggregate_each_minute() {
    let env = common::setup().await;
    // heights 1..=3 in 12:00, height 4 opens 12:01
    env.add_blocks(1..=4, at(12, 0, 15), 15);
    env.chain.set_reward_events(2, vec![reward(OPERATOR, "2.5uluna,10ukrw"), commission(OPERATOR, "0.25uluna")]);
    env.chain.set_head(4);

    let mut service = env.service().with_default_collectors();
    service.run().await.unwrap();

    let mut conn = env.db.pool().acquire().await.unwrap();
    let rows = sqlx::query("SELECT datetime, denom, reward, commission FROM reward ORDER BY denom")
        .fetch_all(&mut *conn)
        .await
        .unwrap();
    let rows: Vec<(i64, String, String, String)> = rows
        .iter()
        .map(|r| {
            (r.try_get("datetime").unwrap(), r.try_get("denom").unwrap(), r.try_get("reward").unwrap(), r.try_get("commission").unwrap())
        })
        .collect();
    let minute = at(12, 0, 0).timestamp();
    assert_eq!(
        rows,
        vec![
            (minute, "ukrw".to_string(), "10".to_string(), "0".to_string()),
            (minute, "uluna".to_string(), "4.5".to_string(), "0.25".to_string()),
        ]
    );

    let info = sqlx::query("SELECT bonded_tokens, staking_ratio, height FROM general_info")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(info.try_get::<Option<String>, _>("bonded_tokens").unwrap().as_deref(), Some("600"));
    assert_eq!(info.try_get::<Option<String>, _>("staking_ratio").unwrap().as_deref(), Some("0.6"));
    assert_eq!(info.try_get::<i64, _>("height").unwrap(), 4);

    let price: String = sqlx::query("SELECT price FROM price WHERE denom = 'ukrw'")
        .fetch_one(&mut *conn)
        .await
        .unwrap()
        .try_get("price")
        .unwrap();
    assert_eq!(price, "250");
}
