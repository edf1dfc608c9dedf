use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use rplink::batch::{BatchOptions, MemoryLogStore, NoopListener, Orchestrator};
use rplink::device::{Credentials, Device};
use rplink::error::PlinkError;
use rplink::scheduler::{ScheduledTrigger, Scheduler};
use rplink::session::{DeviceScript, ReplayTransport};
use tokio::sync::mpsc;

fn clock_from(hour: u32, minute: u32) -> impl Fn() -> DateTime<Local> + Send + Sync + 'static {
    let base = NaiveDate::from_ymd_opt(2026, 5, 4)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .expect("base time");
    let started = tokio::time::Instant::now();
    move || base + chrono::Duration::from_std(started.elapsed()).expect("elapsed")
}

fn fleet() -> ReplayTransport {
    ReplayTransport::new()
        .with_device(
            "10.0.0.1",
            DeviceScript::new("r1#").reply_after(
                "show clock",
                Duration::from_secs(30),
                ["\r\n02:00:31 UTC\r\nr1#"],
            ),
        )
        .with_device(
            "10.0.0.2",
            DeviceScript::new("r2#").reply("show clock", ["\r\n02:00:40 UTC\r\nr2#"]),
        )
}

fn nightly(name: &str, time: &str) -> ScheduledTrigger {
    ScheduledTrigger::daily(name, time)
        .with_batch(
            vec![Device::new("10.0.0.1", "r1"), Device::new("10.0.0.2", "r2")],
            vec!["show clock".to_string()],
            Credentials::new("admin", "pw"),
        )
        .with_options(BatchOptions {
            chunk_timeout_secs: 1,
            disable_paging: false,
            ..BatchOptions::default()
        })
}

/// Starts a batch per fire and reports fires skipped because one is already running.
fn batch_scheduler(
    orchestrator: Orchestrator<ReplayTransport>,
    clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static,
) -> (Scheduler, mpsc::UnboundedReceiver<Result<String, PlinkError>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::with_clock(
        move |trigger: ScheduledTrigger| {
            let orchestrator = orchestrator.clone();
            let tx = tx.clone();
            async move {
                let started = orchestrator.start(
                    trigger.devices.clone(),
                    trigger.commands.clone(),
                    trigger.credentials.clone(),
                    trigger.batch_options(),
                    Arc::new(NoopListener),
                );
                if started.is_ok() {
                    orchestrator.wait().await;
                }
                let _ = tx.send(started.map(|_| trigger.name));
            }
        },
        clock,
    );
    (scheduler, rx)
}

#[tokio::test(start_paused = true)]
async fn fired_trigger_runs_a_batch_grouped_by_its_name() {
    let store = Arc::new(MemoryLogStore::new());
    let orchestrator = Orchestrator::new(fleet(), store.clone());
    let (scheduler, mut rx) = batch_scheduler(orchestrator.clone(), clock_from(1, 59));

    scheduler.add_trigger(nightly("nightly", "02:00")).expect("add");
    scheduler.start();

    assert_eq!(rx.recv().await, Some(Ok("nightly".to_string())));
    let summary = orchestrator.summary();
    assert_eq!((summary.success, summary.failed, summary.total), (2, 0, 2));
    assert!(store.get("nightly/r1").is_some_and(|log| log.contains("02:00:31 UTC")));
    assert!(store.get("nightly/r2").is_some_and(|log| log.contains("02:00:40 UTC")));

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overlapping_fire_is_rejected_by_the_orchestrator() {
    let orchestrator = Orchestrator::new(fleet(), Arc::new(MemoryLogStore::new()));
    let (scheduler, mut rx) = batch_scheduler(orchestrator.clone(), clock_from(1, 59));

    let first = scheduler.add_trigger(nightly("first", "02:00")).expect("add");
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(orchestrator.is_running());

    let second = scheduler.add_trigger(nightly("second", "23:00")).expect("add");
    scheduler.run_now(&second).expect("run now");

    assert_eq!(rx.recv().await, Some(Err(PlinkError::AlreadyRunning)));
    assert_eq!(rx.recv().await, Some(Ok("first".to_string())));
    assert!(scheduler.get_trigger(&first).and_then(|t| t.last_fire).is_some());
    assert!(scheduler.get_trigger(&second).and_then(|t| t.last_fire).is_none());

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deleting_a_trigger_mid_batch_keeps_the_batch_intact() {
    let orchestrator = Orchestrator::new(fleet(), Arc::new(MemoryLogStore::new()));
    let (scheduler, mut rx) = batch_scheduler(orchestrator.clone(), clock_from(1, 59));

    let id = scheduler.add_trigger(nightly("nightly", "02:00")).expect("add");
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(orchestrator.is_running());

    assert!(scheduler.delete_trigger(&id).is_some());
    assert!(scheduler.get_triggers().is_empty());

    assert_eq!(rx.recv().await, Some(Ok("nightly".to_string())));
    let results = orchestrator.results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.success));
    assert_eq!(orchestrator.summary().total, 2);

    scheduler.shutdown().await;
}
