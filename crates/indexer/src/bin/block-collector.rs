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

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use fcd_indexer::{
    lcd::LcdClientConfig, BlockCollectorService, BlockCollectorServiceConfig,
};
use url::Url;

/// Arguments for the block collector.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct BlockCollectorArgs {
    /// URL of the chain's light client daemon.
    #[clap(long, env)]
    lcd_url: Url,

    /// URL of the tendermint RPC endpoint.
    #[clap(long, env)]
    rpc_url: Url,

    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Chain to index, e.g. columbus-5.
    #[clap(long, env)]
    chain_id: String,

    /// Native staking denom.
    #[clap(long, env, default_value = "uluna")]
    native_denom: String,

    /// Interval in seconds between sync passes.
    #[clap(long, default_value = "5")]
    interval: u64,

    /// Number of consecutive failed passes before quitting.
    #[clap(long, default_value = "3")]
    retries: u32,

    /// Milliseconds between polls while the chain has no head block.
    #[clap(long, default_value = "1000")]
    head_poll_ms: u64,

    /// First height of the chain.
    #[clap(long, env, default_value = "0")]
    initial_height: u64,

    /// Pruning interval of the queried nodes.
    #[clap(long, env, default_value = "100")]
    pruning_keep_every: u64,

    /// Timeout in seconds for each request to the chain.
    #[clap(long, default_value = "30")]
    request_timeout: u64,

    /// Whether the chain serves pre-stargate LCD endpoints.
    #[clap(long, env, default_value_t = false)]
    legacy_network: bool,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BlockCollectorArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let lcd_config = LcdClientConfig {
        timeout: Duration::from_secs(args.request_timeout),
        initial_height: args.initial_height,
        pruning_keep_every: args.pruning_keep_every,
        legacy_network: args.legacy_network,
        ..LcdClientConfig::new(args.lcd_url, args.rpc_url)
    };

    let config = BlockCollectorServiceConfig {
        chain_id: args.chain_id,
        native_denom: args.native_denom,
        head_poll_interval: Duration::from_millis(args.head_poll_ms),
    };

    let mut service = BlockCollectorService::new(lcd_config, &args.db, config).await?;

    let mut failures = 0u32;
    loop {
        match service.run().await {
            Ok(report) => {
                failures = 0;
                if report.pruned {
                    tracing::warn!("Pass stopped on pruned data at height {}", report.next_height);
                }
                tracing::info!("Sleeping for {} seconds", args.interval);
                tokio::time::sleep(Duration::from_secs(args.interval)).await;
            }
            Err(e) => {
                failures += 1;
                tracing::error!("Error running block collector: {:?}", e);
                if failures >= args.retries {
                    bail!("Maximum retries reached");
                }
                tracing::info!("Retrying in {} seconds", args.interval);
                tokio::time::sleep(Duration::from_secs(args.interval)).await;
            }
        }
    }
}
