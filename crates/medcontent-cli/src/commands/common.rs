use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use medcontent_core::broadcast::{BroadcastChannel, DisabledChannel, WebSocketChannel};
use medcontent_core::config::ClientConfig;
use medcontent_core::remote::{read_collections_file, HttpContentService, RemoteCollections};
use medcontent_core::store::FileSnapshotStore;
use medcontent_core::sync::PendingSync;
use medcontent_core::{
    CollectionName, CollectionStore, Item, MutationOutcome, SyncClient, SyncOptions,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

const PENDING_FILE_NAME: &str = "pending.json";

pub struct SessionOptions {
    pub snapshot_path: Option<PathBuf>,
    /// Connect to the broadcast relay so peers hear about changes.
    pub broadcast: bool,
}

/// A sync client wired to the configured service, plus where its state lives on disk.
pub struct Session {
    pub client: SyncClient,
    pub pending_path: PathBuf,
}

pub async fn open_session(options: SessionOptions) -> Result<Session, CliError> {
    let config = ClientConfig::from_env()?;
    let snapshot_path = match options.snapshot_path.or_else(|| config.snapshot_path.clone()) {
        Some(path) => path,
        None => default_snapshot_path()?,
    };

    let defaults = load_defaults(config.defaults_path.as_deref())?;
    let store = CollectionStore::open(
        FileSnapshotStore::new(&snapshot_path),
        defaults,
        config.persist_debounce,
    )?;
    let remote = HttpContentService::new(
        config.api_base_url.clone(),
        config.admin_secret.clone(),
        config.request_timeout,
    )?;
    let channel = open_channel(&config, options.broadcast).await?;

    let client = SyncClient::new(store, Arc::new(remote), channel, SyncOptions::from(&config))?;
    let pending_path = pending_path_for(&snapshot_path);
    client.restore_pending(load_pending(&pending_path)?);

    Ok(Session {
        client,
        pending_path,
    })
}

/// Built-in collections shown until hydration brings non-empty replacements.
pub fn load_defaults(path: Option<&Path>) -> Result<RemoteCollections, CliError> {
    let Some(path) = path else {
        return Ok(RemoteCollections::new());
    };
    let defaults = read_collections_file(path)?;
    tracing::debug!("Loaded {} default collections from {}", defaults.len(), path.display());
    Ok(defaults)
}

async fn open_channel(
    config: &ClientConfig,
    broadcast: bool,
) -> Result<Arc<dyn BroadcastChannel>, CliError> {
    if !broadcast {
        return Ok(Arc::new(DisabledChannel::new()));
    }
    let channel = WebSocketChannel::connect(config.broadcast_url.clone())?;
    if !channel.wait_connected(config.request_timeout).await {
        tracing::warn!(
            "Broadcast relay {} unreachable; peers will pick changes up on their next hydration",
            channel.url()
        );
    }
    Ok(Arc::new(channel))
}

impl Session {
    /// Persist the snapshot and the pending ledger.
    pub fn close(&self) -> Result<(), CliError> {
        self.client.store().flush()?;
        save_pending(&self.pending_path, &self.client.pending())
    }
}

pub fn default_snapshot_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("medcontent").join("collections.json"))
        .ok_or(CliError::NoDataDir)
}

pub fn pending_path_for(snapshot_path: &Path) -> PathBuf {
    snapshot_path.with_file_name(PENDING_FILE_NAME)
}

pub fn load_pending(path: &Path) -> Result<Vec<PendingSync>, CliError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

pub fn save_pending(path: &Path, entries: &[PendingSync]) -> Result<(), CliError> {
    if entries.is_empty() {
        return match std::fs::remove_file(path) {
            Err(error) if error.kind() != std::io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        };
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(entries)?)?;
    Ok(())
}

pub fn parse_collection(raw: &str) -> Result<CollectionName, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyCollection);
    }
    Ok(CollectionName::parse(trimmed)?)
}

/// `name=Kano Office` sets a string; `downloadCount=3` or `active=true` set JSON values.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), CliError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidAssignment(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn apply_assignments(item: &mut Item, assignments: &[String]) -> Result<(), CliError> {
    for raw in assignments {
        let (key, value) = parse_assignment(raw)?;
        item.set_field(key, value)?;
    }
    Ok(())
}

/// Print the outcome of a persisted mutation; a failure becomes an error after the local change.
pub fn report_outcome(outcome: MutationOutcome, id: &str) -> Result<(), CliError> {
    match outcome {
        MutationOutcome::Persisted { published, .. } => {
            if !published {
                tracing::info!("Change to {} was not broadcast", id);
            }
            println!("{id}");
            Ok(())
        }
        MutationOutcome::Failed { error } => Err(CliError::NotPersisted(error)),
    }
}

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub collection: String,
    pub id: String,
    pub kind: &'static str,
    pub attempts: u32,
    pub last_error: String,
    pub last_attempt_at: i64,
}

impl From<&PendingSync> for PendingItem {
    fn from(entry: &PendingSync) -> Self {
        Self {
            collection: entry.collection.to_string(),
            id: entry.item_id.to_string(),
            kind: entry.mutation.kind(),
            attempts: entry.attempts,
            last_error: entry.last_error.clone(),
            last_attempt_at: entry.last_attempt_at,
        }
    }
}

pub fn format_item_lines(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{}  {}  {}",
                item.id,
                format_timestamp(item.updated_at),
                item.name().unwrap_or("-")
            )
        })
        .collect()
}

pub fn format_pending_lines(entries: &[PendingSync]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<9}  {}/{}  attempts={}  {}",
                format_timestamp(entry.last_attempt_at),
                entry.mutation.kind(),
                entry.collection,
                entry.item_id,
                entry.attempts,
                entry.last_error
            )
        })
        .collect()
}

pub fn format_timestamp(unix_ms: i64) -> String {
    Utc.timestamp_millis_opt(unix_ms).single().map_or_else(
        || unix_ms.to_string(),
        |timestamp| timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}
