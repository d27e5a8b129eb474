//! End-to-end tests: scripted room source -> listeners -> event bus -> recorders.
//!
//! Time is paused so polling cycles can be stepped deterministically. Listeners
//! poll every 10s without jitter; sleeping 11s always lands just after the next poll.
//!
//! Run with: cargo test --test engine_e2e

use std::sync::Arc;
use std::time::Duration;

use livewatch_core::config::{Config, ListenerConfig, SplitConfig};
use livewatch_core::source::{live_info, offline_info};
use livewatch_core::{Engine, EventKind, EventLog, MockRecordingJob, MockRoomSource, Room};

const WAIT: Duration = Duration::from_secs(1);

fn config(restart_on_rename: bool) -> Config {
    Config {
        listener: ListenerConfig {
            interval_seconds: 10,
            jitter_stddev_ms: 0,
            fetch_timeout_seconds: 5,
        },
        split: SplitConfig {
            on_room_name_changed: restart_on_rename,
            ..SplitConfig::default()
        },
        ..Config::default()
    }
}

struct Harness {
    engine: Engine,
    source: MockRoomSource,
    job: MockRecordingJob,
    log: EventLog,
    room: Room,
}

async fn harness(restart_on_rename: bool) -> Harness {
    let source = MockRoomSource::new();
    let job = MockRecordingJob::new();
    let engine = Engine::new(
        config(restart_on_rename),
        Arc::new(source.clone()),
        Arc::new(job.clone()),
    );
    let log = EventLog::attach(engine.bus());
    engine.start().await;

    Harness {
        engine,
        source,
        job,
        log,
        room: Room::parse("https://live.example.com/4242").unwrap(),
    }
}

async fn next_poll() {
    tokio::time::sleep(Duration::from_secs(11)).await;
}

#[tokio::test(start_paused = true)]
async fn test_going_live_starts_exactly_one_recording() {
    let h = harness(false).await;
    h.source.push_status(&h.room, offline_info("Foo"));
    h.source.push_status(&h.room, live_info("Foo"));

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert_eq!(h.log.count(EventKind::LiveStart), 0);

    next_poll().await;
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);

    // Still live on later polls: nothing new
    next_poll().await;
    next_poll().await;
    assert_eq!(h.log.count(EventKind::LiveStart), 1);
    assert_eq!(h.log.count(EventKind::RecorderStart), 1);
    assert_eq!(h.job.begin_count(&h.room.id), 1);
    assert!(h.engine.recorders().has(&h.room.id));

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rename_without_split_policy_keeps_recording() {
    let h = harness(false).await;
    h.source.push_status(&h.room, live_info("Foo"));
    h.source.push_status(&h.room, live_info("Bar"));

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);
    let started_at = h.engine.recorders().started_at(&h.room.id);

    next_poll().await;
    next_poll().await;

    let listener = h.engine.listeners().get(&h.room.id).await.unwrap();
    assert_eq!(listener.snapshot().await.name, "Bar");
    assert_eq!(h.log.count(EventKind::RoomRenamed), 0);
    assert_eq!(h.log.count(EventKind::RecorderRestart), 0);
    assert_eq!(h.job.begin_count(&h.room.id), 1);
    assert_eq!(h.engine.recorders().started_at(&h.room.id), started_at);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rename_with_split_policy_restarts_once() {
    let h = harness(true).await;
    h.source.push_status(&h.room, live_info("Foo"));
    h.source.push_status(&h.room, live_info("Bar"));

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);
    let first = h.engine.recorders().started_at(&h.room.id).unwrap();

    next_poll().await;
    assert!(h.log.wait_for(EventKind::RecorderRestart, 1, WAIT).await);
    next_poll().await;

    assert_eq!(h.log.count(EventKind::RoomRenamed), 1);
    assert_eq!(h.log.count(EventKind::RecorderRestart), 1);

    let recorder_events: Vec<EventKind> = h
        .log
        .kinds()
        .into_iter()
        .filter(|k| {
            matches!(
                k,
                EventKind::RecorderStart | EventKind::RecorderStop | EventKind::RecorderRestart
            )
        })
        .collect();
    assert_eq!(
        recorder_events,
        vec![
            EventKind::RecorderStart,
            EventKind::RecorderStop,
            EventKind::RecorderRestart
        ]
    );

    let second = h.engine.recorders().started_at(&h.room.id).unwrap();
    assert!(second > first);
    assert_eq!(h.job.begin_count(&h.room.id), 2);
    assert_eq!(h.job.end_count(&h.room.id), 1);
    assert_eq!(h.engine.recorders().len(), 1);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_listening_ends_recording_once_despite_live_end() {
    let h = harness(false).await;
    h.source.set_status(&h.room, live_info("Foo"));

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);

    // A LiveEnd racing the ListenStop for the same room
    h.engine.bus().publish(livewatch_core::Event::LiveEnd {
        room: h.room.clone(),
    });
    h.engine.stop_listening(&h.room.id).await.unwrap();

    assert!(h.log.wait_for(EventKind::ListenStop, 1, WAIT).await);
    assert!(h.log.wait_for(EventKind::RecorderStop, 1, WAIT).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.log.count(EventKind::RecorderStop), 1);
    assert_eq!(h.job.end_count(&h.room.id), 1);
    assert!(h.engine.recorders().is_empty());

    // No polls once closed
    let fetches = h.source.fetch_count(&h.room.id);
    next_poll().await;
    next_poll().await;
    assert_eq!(h.source.fetch_count(&h.room.id), fetches);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_listening_during_begin_leaves_nothing_recording() {
    let h = harness(false).await;
    h.job.set_begin_delay(Duration::from_millis(500));
    h.source.set_status(&h.room, live_info("Foo"));

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert!(h.log.wait_for(EventKind::LiveStart, 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.engine.stop_listening(&h.room.id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(600)).await;
    let status = h.engine.room_status(&h.room.id).await.unwrap();
    assert!(!status.listening);
    assert!(!status.recording);
    assert!(h.engine.recorders().is_empty());
    assert_eq!(h.job.active_count(), 0);
    assert_eq!(h.job.begin_count(&h.room.id), 1);
    assert_eq!(h.job.end_count(&h.room.id), 1);
    assert_eq!(h.log.count(EventKind::RecorderStart), 0);

    // Listening again records as usual
    h.engine.start_listening(&h.room.id).await.unwrap();
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);
    assert!(h.engine.room_status(&h.room.id).await.unwrap().recording);

    h.engine.shutdown().await;
    assert_eq!(h.job.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_keeps_stale_status() {
    let h = harness(false).await;
    h.source.push_status(&h.room, live_info("Foo"));
    h.source.push_failure(&h.room, "HTTP 502");

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);

    next_poll().await;
    let status = h.engine.room_status(&h.room.id).await.unwrap();
    assert!(status.live);
    assert!(status.recording);
    assert_eq!(h.log.count(EventKind::LiveEnd), 0);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_begin_is_retried_on_next_live_start() {
    let h = harness(false).await;
    h.job.fail_next_begin("encoder unavailable");
    h.source.push_status(&h.room, live_info("Foo"));
    h.source.push_status(&h.room, offline_info("Foo"));
    h.source.push_status(&h.room, live_info("Foo"));

    h.engine.add_room(h.room.url.as_str(), true).await.unwrap();
    assert!(h.log.wait_for(EventKind::LiveStart, 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = h.engine.room_status(&h.room.id).await.unwrap();
    assert!(status.live);
    assert!(!status.recording);

    next_poll().await;
    next_poll().await;
    assert!(h.log.wait_for(EventKind::RecorderStart, 1, WAIT).await);
    assert_eq!(h.log.count(EventKind::LiveStart), 2);
    assert!(h.engine.room_status(&h.room.id).await.unwrap().recording);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_every_recording() {
    let h = harness(false).await;
    let mut rooms = Vec::new();
    for n in 0..3 {
        let room = Room::parse(&format!("https://live.example.com/{n}")).unwrap();
        h.source.set_status(&room, live_info("Marathon"));
        h.engine.add_room(room.url.as_str(), true).await.unwrap();
        rooms.push(room);
    }
    assert!(h.log.wait_for(EventKind::RecorderStart, 3, WAIT).await);

    h.engine.shutdown().await;

    assert!(h.engine.listeners().is_empty().await);
    assert!(h.engine.recorders().is_empty());
    assert_eq!(h.job.active_count(), 0);
    for room in &rooms {
        assert_eq!(h.job.end_count(&room.id), 1);
    }
    assert_eq!(h.engine.bus().subscriber_count(EventKind::LiveStart), 1);
}
