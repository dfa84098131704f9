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

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use fcd_rewards::{Coin, RawRewardEvent, RewardKind};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use url::Url;

use super::{
    types::{ConsensusValidator, LcdBlock, StakingPool, ValidatorDescriptor, ValidatorSetPage},
    ChainReader, LcdError,
};

/// Error fragments the LCD uses for "no such thing". Matched case-insensitively.
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "no del",
    "not ex",
    "failed to find",
    "unknown prop",
    "empty bytes",
    "no price reg",
];

/// Error fragments nodes return for heights they no longer keep.
pub const PRUNED_MARKERS: &[&str] = &["transaction not found on node", "lowest height is"];

const LEGACY_STATUSES: [&str; 3] = ["bonded", "unbonded", "unbonding"];
const STATUSES: [&str; 3] = ["BOND_STATUS_BONDED", "BOND_STATUS_UNBONDED", "BOND_STATUS_UNBONDING"];

#[derive(Clone, Debug)]
pub struct LcdClientConfig {
    pub lcd_url: Url,
    pub rpc_url: Url,
    pub timeout: Duration,
    /// First height served by the chain.
    pub initial_height: u64,
    /// Nodes keep every Nth height (plus the most recent N) once pruning starts.
    pub pruning_keep_every: u64,
    /// Pre-stargate LCD status names and supply endpoint.
    pub legacy_network: bool,
}

impl LcdClientConfig {
    pub fn new(lcd_url: Url, rpc_url: Url) -> Self {
        Self {
            lcd_url,
            rpc_url,
            timeout: Duration::from_secs(30),
            initial_height: 0,
            pruning_keep_every: 100,
            legacy_network: false,
        }
    }
}

pub struct LcdClient {
    client: Client,
    config: LcdClientConfig,
    latest_height: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Deserialize)]
struct BlockResults {
    #[serde(default)]
    begin_block_events: Option<Vec<RpcEvent>>,
}

#[derive(Deserialize)]
struct RpcEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<RpcAttribute>,
}

#[derive(Deserialize)]
struct RpcAttribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct SupplyResponse {
    #[serde(default)]
    supply: Vec<Coin>,
}

impl LcdClient {
    pub fn new(config: LcdClientConfig) -> Result<Self, LcdError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config, latest_height: AtomicU64::new(0) })
    }

    /// Height of the last block seen through [ChainReader::latest_block]. Zero if none yet.
    pub fn latest_height(&self) -> u64 {
        self.latest_height.load(Ordering::Relaxed)
    }

    fn height_param(&self, height: Option<u64>) -> Option<u64> {
        queryable_height(
            height,
            self.latest_height(),
            self.config.initial_height,
            self.config.pruning_keep_every,
        )
    }

    fn url(base: &Url, path: &str) -> Url {
        let mut url = base.clone();
        let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, LcdError> {
        let mut url = Self::url(&self.config.lcd_url, path);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        match self.get_json(&url).await?.map(unwrap_envelope) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| LcdError::InvalidResponse { url: url.to_string(), message: e.to_string() }),
        }
    }

    async fn get_json(&self, url: &Url) -> Result<Option<Value>, LcdError> {
        tracing::trace!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return classify_failure(url.as_str(), status.as_u16(), body.trim().to_string())
                .map(|()| None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| LcdError::InvalidResponse { url: url.to_string(), message: e.to_string() })
    }

    fn height_query(&self, height: Option<u64>) -> Vec<(&'static str, String)> {
        self.height_param(height).map(|h| vec![("height", h.to_string())]).unwrap_or_default()
    }
}

/// Height to request for historical state, given node pruning.
///
/// Recent heights and chains that have not started pruning are queried as is. Older heights
/// are rounded up to the next kept multiple of `keep_every`.
pub fn queryable_height(
    height: Option<u64>,
    latest_height: u64,
    initial_height: u64,
    keep_every: u64,
) -> Option<u64> {
    let height = height.filter(|h| *h > 0)?;
    let keep_every = keep_every.max(1);

    if latest_height != 0
        && (latest_height < initial_height.saturating_add(keep_every)
            || latest_height.saturating_sub(height) < keep_every)
    {
        return Some(height);
    }

    Some(initial_height.max(height + (keep_every - height % keep_every)))
}

fn is_pruned_message(message: &str) -> bool {
    PRUNED_MARKERS.iter().any(|marker| message.contains(marker))
}

fn is_not_found_message(message: &str) -> bool {
    let message = message.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Map a failed response to an error, or to `Ok` when it means the thing does not exist.
fn classify_failure(url: &str, status: u16, message: String) -> Result<(), LcdError> {
    if is_pruned_message(&message) {
        return Err(LcdError::Pruned(message));
    }
    if is_not_found_message(&message) {
        return Ok(());
    }
    if status == 400 {
        return Err(LcdError::InvalidRequest { url: url.to_string(), message });
    }
    Err(LcdError::Status { url: url.to_string(), status, message })
}

/// Block results have no "absent" outcome: anything but pruned history fails the block.
fn block_results_failure(url: &Url, status: u16, message: String) -> LcdError {
    if is_pruned_message(&message) {
        return LcdError::Pruned(message);
    }
    if (200..300).contains(&status) {
        return LcdError::InvalidResponse { url: url.to_string(), message };
    }
    LcdError::Status { url: url.to_string(), status, message }
}

/// Legacy LCD endpoints wrap payloads as `{ "height": .., "result": .. }`.
fn unwrap_envelope(value: Value) -> Value {
    let has_height = match value.get("height") {
        Some(Value::String(h)) => !h.is_empty() && h != "0",
        Some(Value::Number(n)) => n.as_u64() != Some(0),
        _ => false,
    };

    match value {
        Value::Object(mut map) if has_height && map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode_attribute(raw: &str, encoded: bool) -> String {
    if !encoded {
        return raw.to_string();
    }
    BASE64
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn decode_reward_events(events: Vec<RpcEvent>) -> Vec<RawRewardEvent> {
    events
        .into_iter()
        .filter_map(|event| {
            let kind = event.kind.parse::<RewardKind>().ok()?;
            // Older tendermint versions base64 encode attribute keys and values.
            let encoded =
                !event.attributes.iter().any(|a| a.key == "amount" || a.key == "validator");

            let mut validator = None;
            let mut amount = String::new();
            for attr in &event.attributes {
                let value = attr.value.as_deref().map(|v| decode_attribute(v, encoded));
                match decode_attribute(&attr.key, encoded).as_str() {
                    "validator" => validator = value,
                    "amount" => amount = value.unwrap_or_default(),
                    _ => {}
                }
            }

            match validator {
                Some(validator) => Some(RawRewardEvent { validator, kind, amount }),
                None => {
                    tracing::warn!("Dropping {} event without validator attribute", kind);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl ChainReader for LcdClient {
    async fn latest_block(&self) -> Result<Option<LcdBlock>, LcdError> {
        let block: Option<LcdBlock> = self.get("/blocks/latest", &[]).await?;
        if let Some(block) = &block {
            self.latest_height.store(block.height(), Ordering::Relaxed);
        }
        Ok(block)
    }

    async fn block(&self, height: u64) -> Result<Option<LcdBlock>, LcdError> {
        self.get(&format!("/blocks/{}", height), &[]).await
    }

    async fn reward_events(&self, height: u64) -> Result<Vec<RawRewardEvent>, LcdError> {
        let mut url = Self::url(&self.config.rpc_url, "/block_results");
        url.query_pairs_mut().append_pair("height", &height.to_string());

        tracing::trace!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(block_results_failure(&url, status.as_u16(), body.trim().to_string()));
        }

        let parsed: RpcResponse<BlockResults> = serde_json::from_str(&body)
            .map_err(|e| LcdError::InvalidResponse { url: url.to_string(), message: e.to_string() })?;

        if let Some(error) = parsed.error {
            let message = match error.data {
                Some(data) => format!("{}: {}", error.message, data),
                None => error.message,
            };
            return Err(block_results_failure(&url, status.as_u16(), message));
        }

        let Some(result) = parsed.result else {
            return Err(LcdError::InvalidResponse {
                url: url.to_string(),
                message: "block results without result or error".to_string(),
            });
        };
        let events = result.begin_block_events.unwrap_or_default();
        Ok(decode_reward_events(events))
    }

    async fn validators(&self, height: Option<u64>) -> Result<Vec<ValidatorDescriptor>, LcdError> {
        let statuses = if self.config.legacy_network { LEGACY_STATUSES } else { STATUSES };
        let height_query = self.height_query(height);

        let mut validators = Vec::new();
        for status in statuses {
            let mut query = vec![("status", status.to_string())];
            query.extend(height_query.iter().cloned());
            let page: Option<Vec<ValidatorDescriptor>> =
                self.get("/staking/validators", &query).await?;
            validators.extend(page.unwrap_or_default());
        }
        Ok(validators)
    }

    async fn validator_set_page(
        &self,
        height: Option<u64>,
        page: u32,
    ) -> Result<Vec<ConsensusValidator>, LcdError> {
        let height = self.height_param(height);
        let path = match height {
            Some(h) => format!("/validatorsets/{}", h),
            None => "/validatorsets/latest".to_string(),
        };

        let mut query = vec![("page", page.to_string())];
        if let Some(h) = height {
            query.push(("height", h.to_string()));
        }

        let set: Option<ValidatorSetPage> = self.get(&path, &query).await?;
        Ok(set.map(|s| s.validators).unwrap_or_default())
    }

    async fn staking_pool(&self, height: Option<u64>) -> Result<Option<StakingPool>, LcdError> {
        self.get("/staking/pool", &self.height_query(height)).await
    }

    async fn total_supply(&self, height: Option<u64>) -> Result<Vec<Coin>, LcdError> {
        let query = self.height_query(height);
        if self.config.legacy_network {
            let supply: Option<Vec<Coin>> = self.get("/supply/total", &query).await?;
            return Ok(supply.unwrap_or_default());
        }

        let supply: Option<SupplyResponse> =
            self.get("/cosmos/bank/v1beta1/supply", &query).await?;
        Ok(supply.map(|s| s.supply).unwrap_or_default())
    }

    async fn oracle_prices(&self, height: Option<u64>) -> Result<Vec<Coin>, LcdError> {
        let prices: Option<Vec<Coin>> =
            self.get("/oracle/denoms/exchange_rates", &self.height_query(height)).await?;
        Ok(prices.unwrap_or_default())
    }
}
