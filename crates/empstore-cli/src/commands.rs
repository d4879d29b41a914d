//! Subcommand implementations.

use crate::ClientOp;
use anyhow::{bail, Context, Result};
use empstore_core::{EmployeeName, FifoPaths, Record, RecordStore, Response};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Parse `ID:NAME:HOURS`. The name may itself contain colons.
pub fn parse_record(s: &str) -> Result<Record, String> {
    let (id, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ID:NAME:HOURS, got '{}'", s))?;
    let (name, hours) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("expected ID:NAME:HOURS, got '{}'", s))?;

    let id: i32 = id
        .trim()
        .parse()
        .map_err(|e| format!("invalid id '{}': {}", id, e))?;
    let hours: f64 = hours
        .trim()
        .parse()
        .map_err(|e| format!("invalid hours '{}': {}", hours, e))?;

    if EmployeeName::would_truncate(name) {
        warn!("Name '{}' will be truncated", name);
    }
    Ok(Record::new(id, name, hours))
}

fn print_records(records: &[Record]) {
    if records.is_empty() {
        println!("(no records)");
    }
    for record in records {
        println!("{}", record);
    }
}

fn print_response(response: &Response) {
    if response.is_success() && !response.payload.is_empty() {
        println!("{} {}", response.status.as_str(), response.payload);
    } else {
        println!("{}", response.status.as_str());
    }
}

pub fn init(file: &Path, records: &[Record]) -> Result<()> {
    let mut seen = HashSet::new();
    for record in records {
        if !record.is_valid() {
            bail!("record id {} must be positive", record.id);
        }
        if !seen.insert(record.id) {
            bail!("record id {} appears more than once", record.id);
        }
    }

    let store = RecordStore::new(file);
    let _lock = store
        .try_lock()
        .context("cannot initialise a file that is being served")?;
    store.replace(records)?;
    info!("Wrote {} record(s) to {}", records.len(), file.display());
    print_records(records);
    Ok(())
}

pub fn show(file: &Path, json: bool) -> Result<()> {
    let records = RecordStore::new(file).load();
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_records(&records);
    }
    Ok(())
}

#[cfg(unix)]
pub async fn serve(file: &Path, paths: FifoPaths) -> Result<()> {
    use empstore_core::transport::{FifoSink, FifoSource};
    use empstore_core::{Dispatcher, Server};
    use std::sync::Arc;

    let store = RecordStore::new(file);
    let _lock = store.try_lock()?;
    let dispatcher = Arc::new(Dispatcher::new(store));

    let source = FifoSource::create(&paths)?;
    info!("Listening on {}", source.path().display());
    let handle = Server::start(dispatcher.clone(), source, FifoSink::new(paths));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server");
    handle.shutdown();
    handle.join().await?;

    println!("Final contents of {}:", file.display());
    print_records(&dispatcher.store().load());
    Ok(())
}

#[cfg(unix)]
pub async fn client(
    client_id: i32,
    timeout: Duration,
    paths: FifoPaths,
    op: ClientOp,
) -> Result<()> {
    use empstore_core::transport::FifoClient;
    use empstore_core::RecordClient;

    let channel = FifoClient::connect(client_id, &paths)?;
    let mut client = RecordClient::new(channel).with_reply_timeout(timeout);

    let response = match op {
        ClientOp::Read { record_id } => client.read(record_id).await?,
        ClientOp::Lock { record_id } => client.lock_for_write(record_id).await?,
        ClientOp::Write { record } => client.commit(record).await?,
        ClientOp::Unlock { record_id } => client.unlock(record_id).await?,
        ClientOp::Exit => client.exit().await?,
        ClientOp::Modify {
            record_id,
            name,
            hours,
        } => {
            let record = client
                .modify(record_id, |record| {
                    if let Some(name) = name {
                        record.name = name.into();
                    }
                    if let Some(hours) = hours {
                        record.hours = hours;
                    }
                })
                .await?;
            println!("SUCCESS {}", record);
            return Ok(());
        }
    };

    print_response(&response);
    Ok(())
}

#[cfg(not(unix))]
pub async fn serve(_file: &Path, _paths: FifoPaths) -> Result<()> {
    bail!("the named-pipe transport requires a unix platform")
}

#[cfg(not(unix))]
pub async fn client(
    _client_id: i32,
    _timeout: Duration,
    _paths: FifoPaths,
    _op: ClientOp,
) -> Result<()> {
    bail!("the named-pipe transport requires a unix platform")
}
