//! junos-syncd - Junos configuration reconciliation daemon
//!
//! Reads the desired state file, converges every object on the device and
//! exits non-zero if any of them failed.
//!
//! Usage: `junos-syncd [--plan] [CONFIG]`

use anyhow::{bail, Context};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use junos_common::ReconcilerConfig;
use junos_reconcile::{sync_all, DesiredState, LockManager, LockWait, Reconciler, Session};

/// Initializes tracing/logging subsystem; `RUST_LOG` overrides the level
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

struct Args {
    plan_only: bool,
    config: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        plan_only: false,
        config: None,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--plan" => args.plan_only = true,
            flag if flag.starts_with("--") => bail!("unknown option '{}'", flag),
            path if args.config.is_none() => args.config = Some(path.to_string()),
            extra => bail!("unexpected argument '{}'", extra),
        }
    }
    Ok(args)
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let config = match &args.config {
        Some(path) => ReconcilerConfig::load_or_default(path)?,
        None => ReconcilerConfig::load()?,
    };
    config.validate().context("invalid configuration")?;

    let desired = DesiredState::load(&config.desired.state_file).with_context(|| {
        format!(
            "failed to load desired state from {}",
            config.desired.state_file.display()
        )
    })?;
    info!(resources = desired.resources.len(), "Loaded desired state");

    let mut session = Session::open(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.device.host))?;

    let locks = Arc::new(LockManager::new(LockWait::from_config(&config)));
    let reconciler = Reconciler::from_config(locks, &config);

    let success = if args.plan_only {
        let mut drift = 0;
        for resource in desired.ordered() {
            let changes = reconciler.plan(&mut session, resource).await?;
            if !changes.is_empty() {
                drift += 1;
                println!("# {}\n{}", resource.describe(), changes);
            }
        }
        info!(drift, "Plan complete");
        true
    } else {
        let summary = sync_all(&reconciler, &mut session, &desired).await;
        for (resource, e) in &summary.failed {
            error!(resource = %resource, error = %e, "Not reconciled");
        }
        summary.is_success()
    };

    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close session");
    }
    Ok(success)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    info!("--- Starting junos-syncd ---");

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(true) => {
            info!("junos-syncd finished");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("junos-syncd finished with failures");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("junos-syncd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
