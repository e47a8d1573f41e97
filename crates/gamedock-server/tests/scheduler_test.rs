// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduler tests against the fake engine.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{FakeEngine, RecordingNotifier};
use gamedock_docker::DockerClient;
use sqlx::SqlitePool;

use gamedock_server::scheduler::{Scheduler, SchedulerConfig, StopOutcome};
use gamedock_store::servers::{self, NewServer};
use gamedock_store::runs;

const PREFIX: &str = "game-panel-";

async fn setup(engine: &FakeEngine) -> (SqlitePool, Arc<Scheduler>, Arc<RecordingNotifier>) {
    let pool = gamedock_store::open_in_memory().await.unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        DockerClient::new(&engine.socket_path),
        notifier.clone(),
        SchedulerConfig {
            container_prefix: PREFIX.to_string(),
            watch_interval: Duration::from_millis(50),
        },
    ));
    (pool, scheduler, notifier)
}

async fn insert_server(pool: &SqlitePool, id: &str, name: &str, image: &str, port: u16) {
    servers::insert(
        pool,
        &NewServer {
            id: id.to_string(),
            name: name.to_string(),
            game_type: "custom".to_string(),
            image: image.to_string(),
            port,
            env: HashMap::from([("EULA".to_string(), "TRUE".to_string())]),
            volumes: HashMap::from([(format!("/data/{}", id), "/data".to_string())]),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_start_runs_container_and_opens_run() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();

    let container = engine.container("game-panel-mc").await.unwrap();
    assert!(container.running);
    assert_eq!(container.image, "itzg/minecraft-server:latest");

    let open = runs::open_run(&pool).await.unwrap().unwrap();
    assert_eq!(open.server_id, "mc");
}

#[tokio::test]
async fn test_start_unknown_server_is_not_found() {
    let engine = FakeEngine::start().await;
    let (_pool, scheduler, _) = setup(&engine).await;

    let err = scheduler.start("ghost").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_start_replaces_active_server() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;
    insert_server(&pool, "vh", "Valheim", "lloesche/valheim-server", 2456).await;

    scheduler.start("mc").await.unwrap();
    scheduler.start("vh").await.unwrap();

    // Exactly one game container running afterward.
    assert_eq!(engine.running_names().await, vec!["game-panel-vh"]);

    // The replaced run is closed before the new one opens.
    let open = runs::open_run(&pool).await.unwrap().unwrap();
    assert_eq!(open.server_id, "vh");

    let mc_history = runs::history(&pool, "mc", 10).await.unwrap();
    assert_eq!(mc_history.len(), 1);
    assert_eq!(mc_history[0].stop_reason.as_deref(), Some("replaced"));
    assert!(mc_history[0].stopped_at.is_some());
}

#[tokio::test]
async fn test_concurrent_starts_leave_one_running() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;
    insert_server(&pool, "vh", "Valheim", "lloesche/valheim-server", 2456).await;

    let (a, b) = tokio::join!(scheduler.start("mc"), scheduler.start("vh"));
    a.unwrap();
    b.unwrap();

    // Whichever order the lock granted, exactly one container is running
    // and the ledger holds two runs, one open and one replaced.
    assert_eq!(engine.running_names().await.len(), 1);

    let mc = runs::history(&pool, "mc", 10).await.unwrap();
    let vh = runs::history(&pool, "vh", 10).await.unwrap();
    assert_eq!(mc.len() + vh.len(), 2);

    let open: Vec<_> = mc
        .iter()
        .chain(vh.iter())
        .filter(|r| r.stopped_at.is_none())
        .collect();
    assert_eq!(open.len(), 1);

    let replaced: Vec<_> = mc
        .iter()
        .chain(vh.iter())
        .filter(|r| r.stop_reason.as_deref() == Some("replaced"))
        .collect();
    assert_eq!(replaced.len(), 1);
}

#[tokio::test]
async fn test_restart_same_server_keeps_single_open_run() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();
    scheduler.stop("mc").await.unwrap();
    scheduler.start("mc").await.unwrap();

    let history = runs::history(&pool, "mc", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    let open: Vec<_> = history.iter().filter(|r| r.stopped_at.is_none()).collect();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn test_start_while_already_running_closes_previous_run() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, notifier) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();
    scheduler.start("mc").await.unwrap();

    assert_eq!(engine.running_names().await, vec!["game-panel-mc"]);

    let history = runs::history(&pool, "mc", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    let open: Vec<_> = history.iter().filter(|r| r.stopped_at.is_none()).collect();
    assert_eq!(open.len(), 1);

    // The recreate is intentional; no crash must be reported for it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(notifier.crashes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_closes_run_with_user_reason() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();
    let outcome = scheduler.stop("mc").await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped { id: "mc".to_string() });

    assert!(engine.running_names().await.is_empty());
    assert!(runs::open_run(&pool).await.unwrap().is_none());

    let history = runs::history(&pool, "mc", 10).await.unwrap();
    assert_eq!(history[0].stop_reason.as_deref(), Some("user"));
}

#[tokio::test]
async fn test_stop_active_with_nothing_running() {
    let engine = FakeEngine::start().await;
    let (_pool, scheduler, _) = setup(&engine).await;

    let outcome = scheduler.stop("active").await.unwrap();
    assert_eq!(outcome, StopOutcome::NothingRunning);
}

#[tokio::test]
async fn test_stop_active_resolves_to_running_server() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();
    let outcome = scheduler.stop("active").await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped { id: "mc".to_string() });
}

#[tokio::test]
async fn test_crash_is_detected_and_notified_once() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, notifier) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();

    // Kill the container out from under the scheduler.
    engine.set_running("game-panel-mc", false).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let history = runs::history(&pool, "mc", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stop_reason.as_deref(), Some("crash"));
    assert!(history[0].stopped_at.is_some());

    // The watcher is single-shot: more polls, still one event.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(notifier.crashes.lock().unwrap().as_slice(), ["Minecraft"]);
    assert_eq!(runs::history(&pool, "mc", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_intentional_stop_is_not_a_crash() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, notifier) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();
    scheduler.stop("mc").await.unwrap();

    // Give a stale watcher every chance to misfire.
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(notifier.crashes.lock().unwrap().is_empty());
    let history = runs::history(&pool, "mc", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stop_reason.as_deref(), Some("user"));
}

#[tokio::test]
async fn test_pull_failure_writes_no_run_row() {
    let engine = FakeEngine::start().await;
    engine.fail_pulls_matching("broken").await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "bad", "Broken", "broken/image:latest", 7777).await;

    let err = scheduler.start("bad").await.unwrap_err();
    assert!(err.to_string().contains("pull"), "unexpected error: {}", err);

    assert!(runs::open_run(&pool).await.unwrap().is_none());
    assert!(runs::history(&pool, "bad", 10).await.unwrap().is_empty());
    assert!(engine.running_names().await.is_empty());
}

#[tokio::test]
async fn test_delete_refused_while_running_then_allowed() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;
    insert_server(&pool, "mc", "Minecraft", "itzg/minecraft-server:latest", 25565).await;

    scheduler.start("mc").await.unwrap();
    let err = scheduler.delete("mc").await.unwrap_err();
    assert!(err.to_string().contains("running"));

    // Backups are intentionally not cascaded on delete.
    gamedock_store::backups::insert(&pool, "mc", "mc_2025-01-01_00-00-00.tar.gz", 42)
        .await
        .unwrap();

    scheduler.stop("mc").await.unwrap();
    scheduler.delete("mc").await.unwrap();

    assert!(servers::get_by_id(&pool, "mc").await.unwrap().is_none());
    assert!(runs::history(&pool, "mc", 10).await.unwrap().is_empty());
    assert_eq!(
        gamedock_store::backups::count(&pool, "mc").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_env_placeholders_resolved_into_container_env() {
    let engine = FakeEngine::start().await;
    let (pool, scheduler, _) = setup(&engine).await;

    // SAFETY: test-local variable name
    unsafe { std::env::set_var("GAMEDOCK_IT_SECRET", "hunter2") };
    servers::insert(
        &pool,
        &NewServer {
            id: "env".to_string(),
            name: "EnvGame".to_string(),
            game_type: "custom".to_string(),
            image: "busybox:latest".to_string(),
            port: 9999,
            env: HashMap::from([
                ("TOKEN".to_string(), "${GAMEDOCK_IT_SECRET}".to_string()),
                ("PLAIN".to_string(), "value".to_string()),
            ]),
            volumes: HashMap::new(),
        },
    )
    .await
    .unwrap();

    scheduler.start("env").await.unwrap();

    let container = engine.container("game-panel-env").await.unwrap();
    assert!(container.running);
    assert_eq!(container.labels.get("gamedock.server-id").unwrap(), "env");
    assert!(container.env.contains(&"TOKEN=hunter2".to_string()));
    assert!(container.env.contains(&"PLAIN=value".to_string()));
}
