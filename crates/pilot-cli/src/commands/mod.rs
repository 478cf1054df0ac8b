mod account;
mod devices;
mod run;
mod scripts;

use std::time::Duration;

use anyhow::Result;
use pilot_runtime::Bridge;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<()> {
    let bridge = Bridge::new(&cli.adb);
    match cli.command {
        Commands::Devices => devices::list(&bridge).await,
        Commands::Scripts { dir } => scripts::list(&dir),
        Commands::Run {
            script,
            devices,
            all,
            stop_grace,
            args,
        } => {
            run::run(
                &bridge,
                run::RunArgs {
                    script,
                    devices,
                    all,
                    args,
                    stop_grace: Duration::from_secs(stop_grace),
                },
            )
            .await
        }
        Commands::Account(command) => account::dispatch(&cli.pool, command).await,
    }
}
