use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pilot")]
#[command(about = "Run automation scripts across connected devices")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Device bridge executable
    #[arg(long, global = true, value_name = "PATH", default_value = "adb")]
    pub adb: PathBuf,

    /// Credential pool document
    #[arg(long, global = true, value_name = "FILE", default_value = "accounts.yaml")]
    pub pool: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List connected devices
    Devices,

    /// List available automation scripts
    Scripts {
        /// Directory scanned for scripts
        #[arg(long, value_name = "DIR", default_value = "scripts")]
        dir: PathBuf,
    },

    /// Run a script on the selected devices
    Run {
        /// Script executable to run
        script: PathBuf,

        /// Target device id (repeatable)
        #[arg(short, long = "device", value_name = "ID")]
        devices: Vec<String>,

        /// Run on every connected device
        #[arg(long, conflicts_with = "devices")]
        all: bool,

        /// Seconds a script gets to exit after a stop request
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        stop_grace: u64,

        /// Extra arguments passed to the script after the device id
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Credential pool operations
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Remove and print the first credential (destructive claim)
    Take {
        /// Consumer name the records are keyed under
        consumer: String,
    },

    /// Claim the first unassigned credential for a device (marks in place)
    Claim {
        consumer: String,

        /// Device the credential is claimed for
        #[arg(short, long, value_name = "ID")]
        device: String,
    },

    /// Mark the record at INDEX as assigned to DEVICE
    Assign {
        consumer: String,
        index: usize,
        device: String,
    },

    /// Print how many unassigned credentials remain
    Count { consumer: String },
}
