//! Cross-process credential claims for automation programs.
//!
//! Scripts shell out to `pilot account ...` and read the record string from
//! stdout, so claims stay serialized by the pool lock even when several
//! control processes share one pool file.

use std::path::Path;

use anyhow::Result;
use pilot_pool::{CredentialRepository, FilePool};

use crate::cli::AccountCommand;

pub async fn dispatch(pool_path: &Path, command: AccountCommand) -> Result<()> {
    let pool = FilePool::new(pool_path);
    match command {
        AccountCommand::Take { consumer } => {
            let record = pool.pop_first(&consumer).await?;
            println!("{record}");
        }
        AccountCommand::Claim { consumer, device } => {
            let (record, _) = pool.claim_first_unassigned(&consumer, &device).await?;
            println!("{record}");
        }
        AccountCommand::Assign {
            consumer,
            index,
            device,
        } => {
            pool.mark_assigned(&consumer, index, &device).await?;
            println!("assigned record {index} to {device}");
        }
        AccountCommand::Count { consumer } => {
            let count = pool.count_unassigned(&consumer).await?;
            println!("{count}");
        }
    }
    Ok(())
}
