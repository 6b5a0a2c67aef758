//! operant-sim: concurrent bank transfers against an in-process runtime.
//!
//! Runs random transfers between a fixed set of accounts, then checks that
//! the total balance is unchanged.
//!
//! ## Configuration
//! ```yaml
//! coordinator:
//!   call_timeout_ms: 5000
//!   max_retries: 100
//! transport:
//!   partitions: 4
//! ```

use std::time::Instant;

use futures::future::join_all;
use rand::Rng;
use tracing::{error, info};

use operant::bank::{Account, AccountProxy, ACCOUNT_TYPE, INITIAL_BALANCE};
use operant::config::Config;
use operant::utils::bootstrap::{init_tracing, parse_config_path};
use operant::{CallContext, ErrorKind, OperatorClientExt, RuntimeBuilder};

const ACCOUNTS: usize = 16;
const TRANSFERS: usize = 400;
const MAX_AMOUNT: i64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let runtime = RuntimeBuilder::new()
        .register(ACCOUNT_TYPE, |id| Box::new(Account::new(id)))
        .with_config(config)
        .build()
        .await?;
    let client = runtime.client();

    let ids: Vec<String> = (0..ACCOUNTS).map(|i| format!("acct-{}", i)).collect();
    let plan: Vec<(usize, usize, i64)> = {
        let mut rng = rand::rng();
        (0..TRANSFERS)
            .map(|_| {
                let from = rng.random_range(0..ACCOUNTS);
                let mut to = rng.random_range(0..ACCOUNTS);
                while to == from {
                    to = rng.random_range(0..ACCOUNTS);
                }
                (from, to, rng.random_range(1..=MAX_AMOUNT))
            })
            .collect()
    };

    info!(
        accounts = ACCOUNTS,
        transfers = TRANSFERS,
        partitions = runtime.partitions(),
        "Starting simulation"
    );
    let started = Instant::now();

    let tasks = plan.into_iter().map(|(from, to, amount)| {
        let client = client.clone();
        let from = ids[from].clone();
        let to = ids[to].clone();
        tokio::spawn(async move {
            let ctx = CallContext::detached();
            let from: AccountProxy = client.find(&from)?;
            let to: AccountProxy = client.find(&to)?;
            from.transfer_balance(&ctx, &client, &to, amount).await
        })
    });

    let (mut committed, mut rejected, mut failed) = (0usize, 0usize, 0usize);
    for outcome in join_all(tasks).await {
        match outcome {
            Ok(Ok(_)) => committed += 1,
            Ok(Err(e)) if e.kind == ErrorKind::Business => rejected += 1,
            Ok(Err(e)) => {
                error!(error = %e, "Transfer failed");
                failed += 1;
            }
            Err(e) => {
                error!(error = %e, "Transfer task panicked");
                failed += 1;
            }
        }
    }

    let ctx = CallContext::detached();
    let mut total = 0;
    for id in &ids {
        let account: AccountProxy = client.find(id)?;
        total += account.balance(&ctx, &client).await?;
    }
    let expected = INITIAL_BALANCE * ACCOUNTS as i64;

    info!(
        committed,
        rejected,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        total,
        expected,
        "Simulation finished"
    );

    runtime.shutdown().await;

    if total != expected {
        return Err(format!("balance not conserved: {} != {}", total, expected).into());
    }
    Ok(())
}
