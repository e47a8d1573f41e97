// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup engine: pause, archive, resume, prune.
//!
//! Archives capture the server's `/data/` volumes as seen from the host
//! bind-mount root. A running container is paused for the duration of the
//! copy and unpaused on every exit path. Retention keeps the newest
//! `max_backups_per_server` archives; the database row is authoritative and
//! orphan files are tolerated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use gamedock_docker::DockerClient;
use sqlx::SqlitePool;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use gamedock_store::backups::{self, BackupRecord};
use gamedock_store::servers;
use gamedock_store::settings::{self, Bag};

use crate::error::{Error, Result};

/// Host path prefix a volume must live under to be captured.
const DATA_PREFIX: &str = "/data/";

/// The backup engine. One per process.
pub struct BackupEngine {
    pool: SqlitePool,
    docker: DockerClient,
    container_prefix: String,
    backup_root: PathBuf,
    host_data_dir: PathBuf,
    /// Per-server create locks so two creates cannot interleave.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Relative directories under the host data root captured for a server.
///
/// Volumes outside `/data/` (engine sockets, config mounts) are skipped.
pub fn backup_dirs(volumes: &HashMap<String, String>) -> Vec<String> {
    let mut dirs: Vec<String> = volumes
        .keys()
        .filter_map(|host| host.strip_prefix(DATA_PREFIX))
        .filter(|rel| !rel.is_empty())
        .map(|rel| rel.trim_end_matches('/').to_string())
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Archive filename for a server at a point in time.
pub fn backup_filename(server_id: &str, at: chrono::DateTime<Utc>) -> String {
    format!("{}_{}.tar.gz", server_id, at.format("%Y-%m-%d_%H-%M-%S"))
}

impl BackupEngine {
    /// Create a backup engine.
    pub fn new(
        pool: SqlitePool,
        docker: DockerClient,
        container_prefix: String,
        backup_root: PathBuf,
        host_data_dir: PathBuf,
    ) -> Self {
        Self {
            pool,
            docker,
            container_prefix,
            backup_root,
            host_data_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn container_name(&self, server_id: &str) -> String {
        format!("{}{}", self.container_prefix, server_id)
    }

    /// Directory holding a server's archives.
    pub fn server_dir(&self, server_id: &str) -> PathBuf {
        self.backup_root.join(server_id)
    }

    /// Absolute path of a recorded archive.
    pub fn archive_path(&self, record: &BackupRecord) -> PathBuf {
        self.server_dir(&record.server_id).join(&record.filename)
    }

    async fn create_lock(&self, server_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn container_running(&self, server_id: &str) -> bool {
        self.docker
            .inspect(&self.container_name(server_id))
            .await
            .map(|inspect| inspect.state.running)
            .unwrap_or(false)
    }

    /// Create a backup for a server and prune to the retention cap.
    pub async fn create(&self, server_id: &str) -> Result<BackupRecord> {
        let lock = self.create_lock(server_id).await;
        let _guard = lock.lock().await;

        let server = servers::get_by_id(&self.pool, server_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Server '{}' not found", server_id)))?;

        let dirs = backup_dirs(&server.volume_map()?);
        if dirs.is_empty() {
            return Err(Error::InvalidRequest(
                "No /data/ volumes configured".to_string(),
            ));
        }

        let dir = self.server_dir(server_id);
        tokio::fs::create_dir_all(&dir).await?;

        let filename = backup_filename(server_id, Utc::now());
        let archive = dir.join(&filename);

        // Freeze the game for a consistent snapshot; the unpause below runs
        // on every exit path of the archive step.
        let paused = if self.container_running(server_id).await {
            match self.docker.pause(&self.container_name(server_id)).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "Pause failed, archiving live");
                    false
                }
            }
        } else {
            false
        };

        let archived = self.run_archiver(&archive, &dirs).await;

        if paused
            && let Err(e) = self.docker.unpause(&self.container_name(server_id)).await
        {
            warn!(server_id = %server_id, error = %e, "Unpause after backup failed");
        }

        if let Err(e) = archived {
            // Never leave a partial archive behind.
            let _ = tokio::fs::remove_file(&archive).await;
            return Err(e);
        }

        let size_bytes = tokio::fs::metadata(&archive).await?.len() as i64;
        let id = backups::insert(&self.pool, server_id, &filename, size_bytes).await?;

        info!(server_id = %server_id, filename = %filename, size_bytes, "Backup created");

        self.prune(server_id).await?;

        Ok(BackupRecord {
            id,
            server_id: server_id.to_string(),
            filename,
            size_bytes,
            created_at: gamedock_store::now_unix(),
        })
    }

    async fn run_archiver(&self, archive: &Path, dirs: &[String]) -> Result<()> {
        let output = Command::new("tar")
            .arg("-czf")
            .arg(archive)
            .arg("-C")
            .arg(&self.host_data_dir)
            .args(dirs)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Other(format!(
                "Archiver failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Delete oldest archives until the server is at or under the cap.
    async fn prune(&self, server_id: &str) -> Result<()> {
        let cap = settings::get_i64(&self.pool, Bag::Panel, "max_backups_per_server", 5).await?;

        while backups::count(&self.pool, server_id).await? > cap {
            let Some(oldest) = backups::oldest(&self.pool, server_id).await? else {
                break;
            };
            let path = self.archive_path(&oldest);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "Pruned archive file already gone");
            }
            backups::delete_by_id(&self.pool, oldest.id).await?;
            info!(server_id = %server_id, filename = %oldest.filename, "Pruned old backup");
        }

        Ok(())
    }

    /// Restore an archive into the host data root. Refused while the
    /// server is running.
    pub async fn restore(&self, server_id: &str, backup_id: i64) -> Result<()> {
        if self.container_running(server_id).await {
            return Err(Error::InvalidRequest(
                "Cannot restore while server is running".to_string(),
            ));
        }

        let record = self.get_owned(server_id, backup_id).await?;
        let archive = self.archive_path(&record);
        if !tokio::fs::try_exists(&archive).await.unwrap_or(false) {
            return Err(Error::NotFound(format!(
                "Backup file '{}' is missing",
                record.filename
            )));
        }

        let output = Command::new("tar")
            .arg("-xzf")
            .arg(&archive)
            .arg("-C")
            .arg(&self.host_data_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Other(format!("Restore failed: {}", stderr.trim())));
        }

        info!(server_id = %server_id, filename = %record.filename, "Backup restored");
        Ok(())
    }

    /// Delete a backup: best-effort file unlink, row always removed.
    pub async fn delete(&self, server_id: &str, backup_id: i64) -> Result<()> {
        let record = self.get_owned(server_id, backup_id).await?;

        let path = self.archive_path(&record);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "Backup file already gone");
        }
        backups::delete_by_id(&self.pool, backup_id).await?;

        info!(server_id = %server_id, filename = %record.filename, "Backup deleted");
        Ok(())
    }

    /// A backup row verified to belong to the server.
    pub async fn get_owned(&self, server_id: &str, backup_id: i64) -> Result<BackupRecord> {
        backups::get_by_id(&self.pool, backup_id)
            .await?
            .filter(|record| record.server_id == server_id)
            .ok_or_else(|| Error::NotFound(format!("Backup {} not found", backup_id)))
    }
}
