// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup engine tests with real archives on a temp filesystem.
//!
//! The engine socket points at the fake engine (or nowhere), so no
//! container is ever running and no pause is attempted; the archive
//! pipeline itself runs for real through `tar`.

mod common;

use std::collections::HashMap;

use common::{FakeContainer, FakeEngine};
use gamedock_docker::DockerClient;
use sqlx::SqlitePool;
use tempfile::TempDir;

use gamedock_server::backup::BackupEngine;
use gamedock_store::servers::{self, NewServer};
use gamedock_store::settings::{self, Bag};
use gamedock_store::backups;

const PREFIX: &str = "game-panel-";

struct Fixture {
    pool: SqlitePool,
    engine: BackupEngine,
    host_data: TempDir,
    backup_root: TempDir,
}

async fn fixture(docker_socket: &std::path::Path) -> Fixture {
    let pool = gamedock_store::open_in_memory().await.unwrap();
    let host_data = TempDir::new().unwrap();
    let backup_root = TempDir::new().unwrap();
    let engine = BackupEngine::new(
        pool.clone(),
        DockerClient::new(docker_socket),
        PREFIX.to_string(),
        backup_root.path().to_path_buf(),
        host_data.path().to_path_buf(),
    );
    Fixture {
        pool,
        engine,
        host_data,
        backup_root,
    }
}

async fn insert_server(pool: &SqlitePool, id: &str, volumes: HashMap<String, String>) {
    servers::insert(
        pool,
        &NewServer {
            id: id.to_string(),
            name: format!("Server {}", id),
            game_type: "custom".to_string(),
            image: "busybox:latest".to_string(),
            port: 25565,
            env: HashMap::new(),
            volumes,
        },
    )
    .await
    .unwrap();
}

fn mc_volumes() -> HashMap<String, String> {
    HashMap::from([("/data/mc".to_string(), "/data".to_string())])
}

#[tokio::test]
async fn test_create_archives_data_volume() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;

    let world = fx.host_data.path().join("mc/world");
    tokio::fs::create_dir_all(&world).await.unwrap();
    tokio::fs::write(world.join("level.dat"), b"chunk data").await.unwrap();

    let record = fx.engine.create("mc").await.unwrap();

    assert!(record.filename.starts_with("mc_"));
    assert!(record.filename.ends_with(".tar.gz"));
    assert!(record.size_bytes > 0);

    let archive = fx.backup_root.path().join("mc").join(&record.filename);
    assert!(archive.exists());
    assert_eq!(backups::count(&fx.pool, "mc").await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_without_data_volumes_is_rejected() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(
        &fx.pool,
        "mc",
        HashMap::from([("/etc/config".to_string(), "/config".to_string())]),
    )
    .await;

    let err = fx.engine.create("mc").await.unwrap_err();
    assert!(err.to_string().contains("No /data/ volumes configured"));
    assert_eq!(backups::count(&fx.pool, "mc").await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_unknown_server_is_not_found() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;

    let err = fx.engine.create("ghost").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_backup_then_restore_round_trips_bytes() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;

    let world = fx.host_data.path().join("mc/world");
    tokio::fs::create_dir_all(&world).await.unwrap();
    tokio::fs::write(world.join("level.dat"), b"original bytes").await.unwrap();
    tokio::fs::write(fx.host_data.path().join("mc/server.properties"), b"motd=hi")
        .await
        .unwrap();

    let record = fx.engine.create("mc").await.unwrap();

    // Corrupt the live tree, then restore.
    tokio::fs::write(world.join("level.dat"), b"corrupted").await.unwrap();
    tokio::fs::remove_file(fx.host_data.path().join("mc/server.properties"))
        .await
        .unwrap();

    fx.engine.restore("mc", record.id).await.unwrap();

    let level = tokio::fs::read(world.join("level.dat")).await.unwrap();
    assert_eq!(level, b"original bytes");
    let props = tokio::fs::read(fx.host_data.path().join("mc/server.properties"))
        .await
        .unwrap();
    assert_eq!(props, b"motd=hi");
}

#[tokio::test]
async fn test_restore_refused_while_running() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;

    tokio::fs::create_dir_all(fx.host_data.path().join("mc")).await.unwrap();
    tokio::fs::write(fx.host_data.path().join("mc/a"), b"x").await.unwrap();
    let record = fx.engine.create("mc").await.unwrap();

    docker
        .seed_container(
            "game-panel-mc",
            FakeContainer {
                image: "busybox:latest".to_string(),
                running: true,
                ..Default::default()
            },
        )
        .await;

    let err = fx.engine.restore("mc", record.id).await.unwrap_err();
    assert!(err.to_string().contains("Cannot restore while server is running"));
}

#[tokio::test]
async fn test_create_pauses_running_container_and_unpauses() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;

    tokio::fs::create_dir_all(fx.host_data.path().join("mc")).await.unwrap();
    tokio::fs::write(fx.host_data.path().join("mc/a"), b"x").await.unwrap();

    docker
        .seed_container(
            "game-panel-mc",
            FakeContainer {
                image: "busybox:latest".to_string(),
                running: true,
                ..Default::default()
            },
        )
        .await;

    fx.engine.create("mc").await.unwrap();

    // Frozen during the copy, resumed afterward.
    let container = docker.container("game-panel-mc").await.unwrap();
    assert!(container.running);
    assert!(!container.paused);
}

#[tokio::test]
async fn test_retention_prunes_oldest_to_cap() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;
    settings::set(&fx.pool, Bag::Panel, "max_backups_per_server", "3")
        .await
        .unwrap();

    tokio::fs::create_dir_all(fx.host_data.path().join("mc")).await.unwrap();
    tokio::fs::write(fx.host_data.path().join("mc/a"), b"x").await.unwrap();

    let mut filenames = Vec::new();
    for _ in 0..4 {
        let record = fx.engine.create("mc").await.unwrap();
        filenames.push(record.filename.clone());
        // Distinct wall-clock seconds keep filenames unique.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    }

    let remaining = backups::list(&fx.pool, "mc").await.unwrap();
    assert_eq!(remaining.len(), 3);

    // The oldest record is gone and its file unlinked.
    let oldest = &filenames[0];
    assert!(remaining.iter().all(|b| &b.filename != oldest));
    assert!(!fx.backup_root.path().join("mc").join(oldest).exists());

    // The newest three survive on disk.
    for filename in &filenames[1..] {
        assert!(fx.backup_root.path().join("mc").join(filename).exists());
    }
}

#[tokio::test]
async fn test_delete_removes_row_and_tolerates_missing_file() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;

    tokio::fs::create_dir_all(fx.host_data.path().join("mc")).await.unwrap();
    tokio::fs::write(fx.host_data.path().join("mc/a"), b"x").await.unwrap();
    let record = fx.engine.create("mc").await.unwrap();

    // Unlink the file behind the engine's back; delete still succeeds.
    tokio::fs::remove_file(fx.backup_root.path().join("mc").join(&record.filename))
        .await
        .unwrap();

    fx.engine.delete("mc", record.id).await.unwrap();
    assert_eq!(backups::count(&fx.pool, "mc").await.unwrap(), 0);
}

#[tokio::test]
async fn test_backup_of_one_server_does_not_touch_another() {
    let docker = FakeEngine::start().await;
    let fx = fixture(&docker.socket_path).await;
    insert_server(&fx.pool, "mc", mc_volumes()).await;
    insert_server2(&fx.pool).await;

    tokio::fs::create_dir_all(fx.host_data.path().join("mc")).await.unwrap();
    tokio::fs::write(fx.host_data.path().join("mc/a"), b"x").await.unwrap();
    tokio::fs::create_dir_all(fx.host_data.path().join("vh")).await.unwrap();
    tokio::fs::write(fx.host_data.path().join("vh/b"), b"y").await.unwrap();

    fx.engine.create("mc").await.unwrap();

    assert_eq!(backups::count(&fx.pool, "mc").await.unwrap(), 1);
    assert_eq!(backups::count(&fx.pool, "vh").await.unwrap(), 0);
    assert!(!fx.backup_root.path().join("vh").exists());
}

async fn insert_server2(pool: &SqlitePool) {
    servers::insert(
        pool,
        &NewServer {
            id: "vh".to_string(),
            name: "Valheim".to_string(),
            game_type: "valheim".to_string(),
            image: "lloesche/valheim-server".to_string(),
            port: 2456,
            env: HashMap::new(),
            volumes: HashMap::from([("/data/vh".to_string(), "/config".to_string())]),
        },
    )
    .await
    .unwrap();
}
