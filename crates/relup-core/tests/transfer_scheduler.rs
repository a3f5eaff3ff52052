//! Scheduler behaviour: concurrency bound, FIFO start order, failure isolation,
//! progress handling and pending-task removal.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relup_core::transfer::{
    FnExecutor, ProgressReporter, SchedulerError, Task, TaskId, TaskStatus, TransferEvent,
    TransferScheduler,
};
use tokio::time::{sleep, Instant};

type Sched = TransferScheduler<&'static str, ()>;
type T = Task<&'static str, ()>;

#[derive(Default)]
struct Observed {
    events: Vec<TransferEvent>,
    max_running: usize,
    progress: HashMap<TaskId, Vec<u8>>,
}

fn observed_scheduler(max_concurrent: usize) -> (Sched, Arc<Mutex<Observed>>) {
    let observed = Arc::new(Mutex::new(Observed::default()));
    let obs = Arc::clone(&observed);
    let sched = TransferScheduler::with_sink(
        max_concurrent,
        move |event: &TransferEvent, snapshot: &[T]| {
            let mut o = obs.lock().unwrap();
            let running = snapshot
                .iter()
                .filter(|t| t.status == TaskStatus::Running)
                .count();
            o.max_running = o.max_running.max(running);
            if let TransferEvent::ProgressUpdated { id, percent } = event {
                o.progress.entry(*id).or_default().push(*percent);
            }
            o.events.push(event.clone());
        },
    );
    (sched, observed)
}

fn by_name(snapshot: &[T], name: &str) -> T {
    snapshot
        .iter()
        .find(|t| t.payload == name)
        .cloned()
        .expect("task present")
}

#[tokio::test(start_paused = true)]
async fn two_slots_with_one_network_failure() {
    let (sched, observed) = observed_scheduler(2);
    for name in ["A", "B", "C"] {
        sched.enqueue(name, ());
    }

    let t0 = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&starts);
    let summary = sched
        .run(FnExecutor::new(move |task: T, _progress: ProgressReporter| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push((task.payload, t0.elapsed()));
                match task.payload {
                    "A" => {
                        sleep(Duration::from_millis(500)).await;
                        Ok(())
                    }
                    "B" => {
                        sleep(Duration::from_millis(50)).await;
                        anyhow::bail!("network error")
                    }
                    _ => {
                        sleep(Duration::from_millis(100)).await;
                        Ok(())
                    }
                }
            }
        }))
        .await
        .unwrap();

    let starts = starts.lock().unwrap().clone();
    let order: Vec<_> = starts.iter().map(|(name, _)| *name).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    assert_eq!(starts[0].1, Duration::ZERO);
    assert_eq!(starts[1].1, Duration::ZERO);
    // C only gets a slot once B has failed.
    assert!(starts[2].1 >= Duration::from_millis(50));
    assert!(starts[2].1 < Duration::from_millis(500));

    let snap = sched.snapshot();
    assert_eq!(by_name(&snap, "A").status, TaskStatus::Completed);
    let b = by_name(&snap, "B");
    assert_eq!(b.status, TaskStatus::Failed);
    assert_eq!(b.error.as_deref(), Some("network error"));
    assert_eq!(by_name(&snap, "C").status, TaskStatus::Completed);

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.to_string(), "2 of 3 succeeded (1 failed)");
    assert_eq!(observed.lock().unwrap().max_running, 2);
    assert_eq!(sched.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn single_slot_starts_in_submission_order() {
    let (sched, observed) = observed_scheduler(1);
    let ids: Vec<TaskId> = ["A", "B", "C"]
        .into_iter()
        .map(|name| sched.enqueue(name, ()))
        .collect();

    sched
        .run(FnExecutor::new(|_task: T, _progress: ProgressReporter| async {
            sleep(Duration::from_millis(10)).await;
            Ok(())
        }))
        .await
        .unwrap();

    let events = observed.lock().unwrap().events.clone();
    let lifecycle: Vec<_> = events
        .into_iter()
        .filter(|e| !matches!(e, TransferEvent::Enqueued { .. }))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            TransferEvent::Started { id: ids[0] },
            TransferEvent::Completed { id: ids[0] },
            TransferEvent::Started { id: ids[1] },
            TransferEvent::Completed { id: ids[1] },
            TransferEvent::Started { id: ids[2] },
            TransferEvent::Completed { id: ids[2] },
        ]
    );
    assert_eq!(observed.lock().unwrap().max_running, 1);
}

#[tokio::test(start_paused = true)]
async fn active_set_never_exceeds_limit() {
    let (sched, observed) = observed_scheduler(3);
    let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    for name in names {
        sched.enqueue(name, ());
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let summary = sched
        .run(FnExecutor::new(move |task: T, _progress: ProgressReporter| {
            let in_flight = Arc::clone(&in_flight_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let ms = 10 + (task.payload.as_bytes()[0] as u64 % 7) * 15;
                sleep(Duration::from_millis(ms)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .await
        .unwrap();

    assert_eq!(summary.completed, names.len());
    assert!(summary.all_succeeded());
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(observed.lock().unwrap().max_running, 3);
    assert!(sched.snapshot().iter().all(|t| t.status.is_terminal()));
}

#[tokio::test]
async fn failures_and_panics_do_not_affect_siblings() {
    let sched: Sched = TransferScheduler::new(2);
    for name in ["ok1", "err", "panic", "ok2", "ok3"] {
        sched.enqueue(name, ());
    }

    let summary = sched
        .run(FnExecutor::new(|task: T, _progress: ProgressReporter| async move {
            match task.payload {
                "err" => Err(anyhow::anyhow!("disk full").context("write chunk")),
                "panic" => panic!("boom"),
                _ => Ok(()),
            }
        }))
        .await
        .unwrap();

    let snap = sched.snapshot();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(
        by_name(&snap, "err").error.as_deref(),
        Some("write chunk: disk full")
    );
    assert_eq!(
        by_name(&snap, "panic").error.as_deref(),
        Some("transfer panicked: boom")
    );
    for name in ["ok1", "ok2", "ok3"] {
        let t = by_name(&snap, name);
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.progress, 100);
        assert!(t.error.is_none());
    }
}

/// Error whose message cannot be rendered.
#[derive(Debug)]
struct UnprintableError;

impl fmt::Display for UnprintableError {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        panic!("display exploded")
    }
}

impl std::error::Error for UnprintableError {}

#[tokio::test]
async fn failure_with_panicking_display_still_settles() {
    let sched: Sched = TransferScheduler::new(1);
    let bad = sched.enqueue("bad", ());
    let next = sched.enqueue("next", ());

    let summary = sched
        .run(FnExecutor::new(|task: T, _progress: ProgressReporter| async move {
            if task.payload == "bad" {
                return Err(anyhow::Error::new(UnprintableError));
            }
            Ok(())
        }))
        .await
        .unwrap();

    let bad = sched.task(bad).unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(
        bad.error.as_deref(),
        Some("transfer panicked: display exploded")
    );
    assert_eq!(sched.task(next).unwrap().status, TaskStatus::Completed);
    assert!(summary.is_settled());
    assert_eq!(summary.failed, 1);
    assert_eq!(sched.active_count(), 0);
}

#[tokio::test]
async fn progress_is_clamped_and_monotonic() {
    let (sched, observed) = observed_scheduler(2);
    let id = sched.enqueue("file", ());

    sched
        .run(FnExecutor::new(|_task: T, progress: ProgressReporter| async move {
            assert!(progress.update(10));
            assert!(!progress.update(5));
            assert!(progress.update(60));
            assert!(progress.update(150));
            assert!(!progress.update(100));
            Ok(())
        }))
        .await
        .unwrap();

    let seen = observed.lock().unwrap().progress.get(&id).cloned().unwrap();
    assert_eq!(seen, vec![10, 60, 100]);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));

    // Late update after completion is ignored and does not revert status.
    assert!(!sched.update_progress(id, 150));
    assert!(!sched.update_progress(id, 3));
    let task = sched.task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
}

#[tokio::test]
async fn failed_task_keeps_last_progress() {
    let sched: Sched = TransferScheduler::new(1);
    let id = sched.enqueue("file", ());
    sched
        .run(FnExecutor::new(|_task: T, progress: ProgressReporter| async move {
            progress.update_fraction(3, 10);
            anyhow::bail!("connection reset")
        }))
        .await
        .unwrap();
    let task = sched.task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.progress, 30);
    assert_eq!(sched.overall_progress(), 30);
}

#[tokio::test]
async fn only_pending_tasks_can_be_removed() {
    let sched: Sched = TransferScheduler::new(1);
    let a = sched.enqueue("A", ());
    let b = sched.enqueue("B", ());
    let c = sched.enqueue("C", ());

    let handle = sched.clone();
    let results = Arc::new(Mutex::new(Vec::new()));
    let results_c = Arc::clone(&results);
    sched
        .run(FnExecutor::new(move |task: T, _progress: ProgressReporter| {
            let handle = handle.clone();
            let results = Arc::clone(&results_c);
            async move {
                if task.id == a {
                    results.lock().unwrap().push(handle.remove(a));
                    results.lock().unwrap().push(handle.remove(c));
                }
                Ok(())
            }
        }))
        .await
        .unwrap();

    let results = results.lock().unwrap().clone();
    assert_eq!(
        results[0],
        Err(SchedulerError::InvalidState {
            id: a,
            status: TaskStatus::Running
        })
    );
    assert_eq!(results[1], Ok(()));

    let ids: Vec<_> = sched.snapshot().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert_eq!(sched.remove(c), Err(SchedulerError::UnknownTask(c)));
    assert!(matches!(
        sched.remove(b),
        Err(SchedulerError::InvalidState { status: TaskStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn tasks_enqueued_during_run_are_admitted() {
    let sched: Sched = TransferScheduler::new(2);
    sched.enqueue("first", ());
    let handle = sched.clone();
    let summary = sched
        .run(FnExecutor::new(move |task: T, _progress: ProgressReporter| {
            let handle = handle.clone();
            async move {
                if task.payload == "first" {
                    handle.enqueue("late", ());
                    sleep(Duration::from_millis(20)).await;
                }
                Ok(())
            }
        }))
        .await
        .unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
}

#[tokio::test]
async fn second_concurrent_run_is_rejected() {
    let sched: Sched = TransferScheduler::new(1);
    sched.enqueue("outer", ());
    let handle = sched.clone();
    let nested = Arc::new(Mutex::new(None));
    let nested_c = Arc::clone(&nested);
    sched
        .run(FnExecutor::new(move |_task: T, _progress: ProgressReporter| {
            let handle = handle.clone();
            let nested = Arc::clone(&nested_c);
            async move {
                let res = handle
                    .run(FnExecutor::new(|_t: T, _p: ProgressReporter| async { Ok(()) }))
                    .await;
                *nested.lock().unwrap() = Some(res.map(|s| s.total));
                Ok(())
            }
        }))
        .await
        .unwrap();
    assert_eq!(
        *nested.lock().unwrap(),
        Some(Err(SchedulerError::AlreadyRunning))
    );

    // Flag is released once the batch is done.
    assert!(sched
        .run(FnExecutor::new(|_t: T, _p: ProgressReporter| async { Ok(()) }))
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn hung_transfer_fails_after_deadline() {
    let sched: Sched = TransferScheduler::new(1).with_task_timeout(Duration::from_secs(1));
    let hung = sched.enqueue("hung", ());
    let next = sched.enqueue("next", ());
    sched
        .run(FnExecutor::new(|task: T, _progress: ProgressReporter| async move {
            if task.payload == "hung" {
                sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }))
        .await
        .unwrap();
    let hung = sched.task(hung).unwrap();
    assert_eq!(hung.status, TaskStatus::Failed);
    assert_eq!(hung.error.as_deref(), Some("transfer timed out after 1s"));
    assert_eq!(sched.task(next).unwrap().status, TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn dropping_run_cancels_in_flight_transfers() {
    let sched: Sched = TransferScheduler::new(1);
    let slow = sched.enqueue("slow", ());
    let later = sched.enqueue("later", ());

    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let batch = sched.run(FnExecutor::new(move |_task: T, progress: ProgressReporter| {
        let flag = Arc::clone(&flag);
        async move {
            progress.update(10);
            sleep(Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    }));
    assert!(tokio::time::timeout(Duration::from_secs(1), batch)
        .await
        .is_err());

    // Let the runtime drop the aborted wrapper and executor tasks.
    sleep(Duration::from_millis(10)).await;
    let slow = sched.task(slow).unwrap();
    assert_eq!(slow.status, TaskStatus::Failed);
    assert_eq!(
        slow.error.as_deref(),
        Some("transfer cancelled before it settled")
    );
    assert_eq!(slow.progress, 10);
    assert_eq!(sched.task(later).unwrap().status, TaskStatus::Pending);
    assert_eq!(sched.active_count(), 0);

    sleep(Duration::from_secs(120)).await;
    assert!(!finished.load(Ordering::SeqCst));

    // The scheduler is usable again and picks up what was still queued.
    sched
        .run(FnExecutor::new(|_t: T, _p: ProgressReporter| async { Ok(()) }))
        .await
        .unwrap();
    assert_eq!(sched.task(later).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn empty_batch_finishes_immediately() {
    let (sched, observed) = observed_scheduler(4);
    let summary = sched
        .run(FnExecutor::new(|_t: T, _p: ProgressReporter| async { Ok(()) }))
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
    assert!(sched.is_empty());
    assert!(observed.lock().unwrap().events.is_empty());
}

#[tokio::test]
async fn enqueue_notifies_and_clear_drops_settled_tasks() {
    let (sched, observed) = observed_scheduler(1);
    let a = sched.enqueue("A", ());
    sched.enqueue("B", ());
    assert_eq!(
        observed.lock().unwrap().events.first(),
        Some(&TransferEvent::Enqueued { id: a })
    );
    assert_eq!(sched.queued_count(), 2);

    sched
        .run(FnExecutor::new(|_t: T, _p: ProgressReporter| async { Ok(()) }))
        .await
        .unwrap();
    assert_eq!(sched.clear(), 2);
    assert!(sched.is_empty());
    assert_eq!(sched.overall_progress(), 0);
}

#[test]
fn zero_concurrency_is_raised_to_one() {
    let sched: Sched = TransferScheduler::new(0);
    assert_eq!(sched.max_concurrent(), 1);
}
