//! Migration tracking
//!
//! Migrations are SQL scripts named `<version>_<description>.<ext>` in one
//! directory. Filenames sort in creation order; the tracking table records
//! the file stem of every applied script.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use quarry_core::{MigrationConfig, Record, Value};
use quarry_queries::quote_identifier;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::error::{DataError, DataResult};
use crate::gateway::{ConnectionGateway, DedicatedConnection};

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// A script found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File stem, as recorded once applied
    pub name: String,
    pub path: PathBuf,
    /// Sortable prefix before the first `_`
    pub version: String,
}

impl MigrationFile {
    fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_stem()?.to_str()?.to_string();
        let version = name.split('_').next().unwrap_or_default().to_string();
        Some(Self { name, path, version })
    }
}

/// A row of the tracking table
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub id: i64,
    pub name: String,
    pub executed_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    fn from_row(row: &Record) -> DataResult<Self> {
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DataError::Decode("migration row without a name".into()))?;
        Ok(Self {
            id: row.get("id").and_then(Value::as_i64).unwrap_or_default(),
            name: name.to_string(),
            executed_at: match row.get("executed_at") {
                Some(Value::Timestamp(t)) => Some(*t),
                _ => None,
            },
        })
    }
}

/// Applied and pending migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<MigrationFile>,
}

/// Discovers, records and applies migrations
pub struct MigrationTracker {
    gateway: Arc<dyn ConnectionGateway>,
    config: MigrationConfig,
}

impl MigrationTracker {
    pub fn new(gateway: Arc<dyn ConnectionGateway>, config: MigrationConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Scripts in the migrations directory, sorted by filename
    ///
    /// A missing directory has no migrations.
    pub async fn discover(&self) -> DataResult<Vec<MigrationFile>> {
        discover_in(&self.config.directory, &self.config.extension).await
    }

    /// Create the tracking table if it does not exist
    pub async fn ensure_table(&self) -> DataResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id SERIAL PRIMARY KEY, \
             name VARCHAR(255) NOT NULL UNIQUE, \
             executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
            quote_identifier(&self.config.table)
        );
        self.gateway.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Recorded migrations, oldest first
    pub async fn executed(&self) -> DataResult<Vec<MigrationRecord>> {
        self.ensure_table().await?;
        let sql = format!(
            r#"SELECT "id", "name", "executed_at" FROM {} ORDER BY "id""#,
            quote_identifier(&self.config.table)
        );
        let output = self.gateway.execute(&sql, &[]).await?;
        output.rows.iter().map(MigrationRecord::from_row).collect()
    }

    /// Discovered scripts that are not recorded yet, in order
    pub async fn pending(&self) -> DataResult<Vec<MigrationFile>> {
        let applied: HashSet<String> = self
            .executed()
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();
        Ok(self
            .discover()
            .await?
            .into_iter()
            .filter(|file| !applied.contains(&file.name))
            .collect())
    }

    pub async fn status(&self) -> DataResult<MigrationStatus> {
        let applied = self.executed().await?;
        let names: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        let pending = self
            .discover()
            .await?
            .into_iter()
            .filter(|file| !names.contains(file.name.as_str()))
            .collect();
        Ok(MigrationStatus { applied, pending })
    }

    /// Apply every pending migration, each in its own transaction
    ///
    /// Stops at the first failure; migrations applied before it stay
    /// recorded. Returns the names applied.
    #[instrument(skip(self), fields(directory = %self.config.directory.display()))]
    pub async fn run(&self) -> DataResult<Vec<String>> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(Vec::new());
        }

        let mut conn = self.gateway.acquire().await?;
        let result = self.apply_all(conn.as_mut(), &pending).await;
        conn.release();
        result
    }

    async fn apply_all(
        &self,
        conn: &mut dyn DedicatedConnection,
        pending: &[MigrationFile],
    ) -> DataResult<Vec<String>> {
        let mut applied = Vec::with_capacity(pending.len());
        for file in pending {
            self.apply_one(conn, file)
                .await
                .map_err(|e| DataError::Migration {
                    name: file.name.clone(),
                    source: Box::new(e),
                })?;
            info!(migration = %file.name, "Applied migration");
            applied.push(file.name.clone());
        }
        Ok(applied)
    }

    async fn apply_one(&self, conn: &mut dyn DedicatedConnection, file: &MigrationFile) -> DataResult<()> {
        let script = tokio::fs::read_to_string(&file.path).await?;

        conn.execute("BEGIN", &[]).await?;
        if let Err(e) = self.apply_script(conn, file, &script).await {
            if let Err(rollback) = conn.execute("ROLLBACK", &[]).await {
                warn!(migration = %file.name, error = %rollback, "rollback of failed migration failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn apply_script(
        &self,
        conn: &mut dyn DedicatedConnection,
        file: &MigrationFile,
        script: &str,
    ) -> DataResult<()> {
        conn.execute_batch(script).await?;
        let record = format!(
            r#"INSERT INTO {} ("name") VALUES ($1)"#,
            quote_identifier(&self.config.table)
        );
        conn.execute(&record, &[Value::from(file.name.as_str())]).await?;
        conn.execute("COMMIT", &[]).await?;
        Ok(())
    }

    /// Write a new, empty migration script and return its path
    pub async fn create(&self, description: &str) -> DataResult<PathBuf> {
        create_migration(&self.config, description).await
    }
}

/// Write `<timestamp>_<description>.<ext>` into the migrations directory
///
/// Needs no database connection. The directory is created if missing.
#[instrument(skip(config), fields(directory = %config.directory.display()))]
pub async fn create_migration(config: &MigrationConfig, description: &str) -> DataResult<PathBuf> {
    let slug = sanitize(description);
    if slug.is_empty() {
        return Err(DataError::Config(format!(
            "migration name {:?} has no usable characters",
            description
        )));
    }

    let now = Utc::now();
    let filename = format!("{}_{}.{}", now.format("%Y%m%d%H%M%S"), slug, config.extension);
    tokio::fs::create_dir_all(&config.directory).await?;
    let path = config.directory.join(filename);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    file.write_all(template(description, now).as_bytes()).await?;
    file.flush().await?;

    info!(path = %path.display(), "Created migration");
    Ok(path)
}

async fn discover_in(directory: &Path, extension: &str) -> DataResult<Vec<MigrationFile>> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if let Some(file) = MigrationFile::from_path(path) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(files)
}

fn sanitize(description: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&description.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

fn template(description: &str, created: DateTime<Utc>) -> String {
    format!(
        "-- Migration: {}\n-- Created: {}\n\n-- Write the schema change below.\n",
        description,
        created.to_rfc3339()
    )
}
