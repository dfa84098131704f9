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

use anyhow::{Context, Result};
use clap::Parser;
use fcd_indexer::{lcd::LcdClientConfig, StakingReturnService};
use url::Url;

/// Prints the daily staking return series as JSON.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct StakingReturnsArgs {
    /// URL of the chain's light client daemon.
    #[clap(long, env)]
    lcd_url: Url,

    /// URL of the tendermint RPC endpoint.
    #[clap(long, env)]
    rpc_url: Url,

    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Chain whose history is reported.
    #[clap(long, env)]
    chain_id: String,

    /// Denom every return is expressed in.
    #[clap(long, env, default_value = "uluna")]
    native_denom: String,

    /// Only report this many days before today. Absent or 0 reports the whole history.
    #[clap(long)]
    days_before: Option<u32>,

    /// Instead of the series, print this validator's reward and commission for `--date`.
    #[clap(long, requires = "date")]
    operator: Option<String>,

    /// UTC day (YYYY-MM-DD) used with `--operator`.
    #[clap(long)]
    date: Option<chrono::NaiveDate>,

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
    let args = StakingReturnsArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    // stdout carries the report
    if args.log_json {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }

    let lcd_config = LcdClientConfig {
        timeout: Duration::from_secs(args.request_timeout),
        legacy_network: args.legacy_network,
        ..LcdClientConfig::new(args.lcd_url, args.rpc_url)
    };

    let service =
        StakingReturnService::new(lcd_config, &args.db, &args.chain_id, &args.native_denom).await?;
    if let (Some(operator), Some(date)) = (&args.operator, args.date) {
        let earnings = service
            .validator_earnings(operator, date)
            .await
            .with_context(|| format!("Failed to sum earnings of {operator} on {date}"))?;
        println!("{}", serde_json::to_string_pretty(&earnings)?);
        return Ok(());
    }

    let returns = service
        .compute_daily_returns(args.days_before)
        .await
        .context("Failed to compute daily staking returns")?;

    println!("{}", serde_json::to_string_pretty(&returns)?);
    Ok(())
}
