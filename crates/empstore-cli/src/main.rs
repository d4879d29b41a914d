//! Empstore - employee record server and client.
//!
//! `serve` owns the record file and answers requests arriving on the server
//! FIFO. `client` issues a single request under a client id; locks taken by
//! one invocation stay held under that id until a later `unlock` or `exit`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use empstore_core::Record;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "empstore")]
#[command(about = "Lock-coordinated employee record store")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// FIFO locations shared by `serve` and `client`.
#[derive(clap::Args, Debug, Clone)]
struct FifoArgs {
    /// Inbound FIFO read by the server
    #[arg(long)]
    server_fifo: Option<PathBuf>,

    /// Reply FIFO path with `{id}` standing for the client id
    #[arg(long)]
    client_template: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or replace a record file
    Init {
        file: PathBuf,

        /// Record as ID:NAME:HOURS (repeatable)
        #[arg(short, long = "record", value_parser = commands::parse_record)]
        records: Vec<Record>,
    },

    /// Print the records in a file
    Show {
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve a record file until interrupted
    Serve {
        file: PathBuf,

        #[command(flatten)]
        fifos: FifoArgs,
    },

    /// Send one request to a running server
    Client {
        client_id: i32,

        /// Milliseconds to wait for the reply
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        #[command(flatten)]
        fifos: FifoArgs,

        #[command(subcommand)]
        op: ClientOp,
    },
}

#[derive(Subcommand, Debug)]
enum ClientOp {
    /// Take a shared lock and print the record
    Read { record_id: i32 },
    /// Take the write lock and print the record
    Lock { record_id: i32 },
    /// Overwrite a record given as ID:NAME:HOURS
    Write {
        #[arg(value_parser = commands::parse_record)]
        record: Record,
    },
    /// Release this client's locks on a record
    Unlock { record_id: i32 },
    /// Release every lock held by this client
    Exit,
    /// Lock, update and unlock a record
    Modify {
        record_id: i32,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        hours: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for command output
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Init { file, records } => commands::init(&file, &records),
        Command::Show { file, json } => commands::show(&file, json),
        Command::Serve { file, fifos } => commands::serve(&file, fifos.resolve()?).await,
        Command::Client {
            client_id,
            timeout_ms,
            fifos,
            op,
        } => {
            let timeout = std::time::Duration::from_millis(timeout_ms);
            commands::client(client_id, timeout, fifos.resolve()?, op).await
        }
    }
}

impl FifoArgs {
    fn resolve(self) -> Result<empstore_core::FifoPaths> {
        let defaults = empstore_core::FifoPaths::default();
        let paths = empstore_core::FifoPaths::new(
            self.server_fifo.unwrap_or(defaults.server),
            self.client_template.unwrap_or(defaults.client_template),
        )?;
        Ok(paths)
    }
}
