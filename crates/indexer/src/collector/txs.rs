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

use anyhow::Result;
use async_trait::async_trait;
use sqlx::AnyConnection;

use crate::db::{blocks, BlockRecord, TxRecord};

/// Persists the transactions of a block. Only invoked for blocks with transactions.
#[async_trait]
pub trait TxCollector: Send + Sync {
    async fn collect(
        &self,
        conn: &mut AnyConnection,
        tx_hashes: &[String],
        height: u64,
        block: &BlockRecord,
    ) -> Result<Vec<TxRecord>>;
}

/// Derives further facts (contract events, governance) from collected transactions.
#[async_trait]
pub trait TxFollower: Send + Sync {
    async fn follow(&self, conn: &mut AnyConnection, txs: &[TxRecord], height: u64) -> Result<()>;
}

/// Stores one `tx` row per transaction hash, in block order.
pub struct TxHashCollector;

#[async_trait]
impl TxCollector for TxHashCollector {
    async fn collect(
        &self,
        conn: &mut AnyConnection,
        tx_hashes: &[String],
        height: u64,
        block: &BlockRecord,
    ) -> Result<Vec<TxRecord>> {
        let records: Vec<TxRecord> = tx_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| TxRecord {
                chain_id: block.chain_id.clone(),
                hash: hash.clone(),
                height,
                index,
                time: block.time,
            })
            .collect();

        blocks::insert_txs(conn, &records).await?;
        Ok(records)
    }
}
