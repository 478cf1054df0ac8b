//! Fan a script out across devices and supervise it to completion.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use pilot_runtime::{Bridge, Fleet, ScriptSpec, SessionConfig};
use tracing::info;

pub struct RunArgs {
    pub script: PathBuf,
    pub devices: Vec<String>,
    pub all: bool,
    pub args: Vec<String>,
    pub stop_grace: Duration,
}

pub async fn run(bridge: &Bridge, args: RunArgs) -> Result<()> {
    let devices = if args.all {
        bridge.list_devices().await?
    } else {
        args.devices
    };
    if devices.is_empty() {
        anyhow::bail!("no devices selected; pass --device or --all");
    }

    let config = SessionConfig {
        stop_grace: args.stop_grace,
        bridge: bridge.clone(),
        ..SessionConfig::default()
    };
    let fleet = Fleet::new(config);
    let spec = ScriptSpec::new(&args.script).with_args(args.args);

    let outcomes = fleet.run_on_selected(&spec, &devices).await;
    let failed = outcomes.iter().filter(|outcome| !outcome.launched()).count();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("{}: launched", outcome.device),
            Err(err) => println!("{}: {err}", outcome.device),
        }
    }
    if failed == outcomes.len() {
        anyhow::bail!("no launches succeeded");
    }

    // Block until every run finishes; an interrupt stops the whole fleet.
    tokio::select! {
        _ = fleet.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!(target = "pilot", "interrupt received, stopping all sessions");
            fleet.stop_all().await;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} launches failed", outcomes.len());
    }
    Ok(())
}
