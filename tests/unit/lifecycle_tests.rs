//! Start/stop state machine for background loops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alertflow::lifecycle::{PeriodicTask, TaskPhase};
use tokio_util::sync::CancellationToken;

fn spawn_waiting(
    cancel: CancellationToken,
    exits: Arc<AtomicUsize>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        cancel.cancelled().await;
        exits.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn new_task_is_idle_and_stop_is_noop() {
    let task = PeriodicTask::new("test");
    assert_eq!(task.phase(), TaskPhase::Idle);
    task.stop().await;
    assert_eq!(task.phase(), TaskPhase::Idle);
}

#[tokio::test]
async fn start_then_stop_waits_for_loop_exit() {
    let task = PeriodicTask::new("test");
    let exits = Arc::new(AtomicUsize::new(0));

    let e = Arc::clone(&exits);
    assert!(task.start(move |cancel| spawn_waiting(cancel, e)));
    assert_eq!(task.phase(), TaskPhase::Running);

    task.stop().await;
    assert_eq!(task.phase(), TaskPhase::Idle);
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_start_is_ignored_while_running() {
    let task = PeriodicTask::new("test");
    let exits = Arc::new(AtomicUsize::new(0));

    let e = Arc::clone(&exits);
    assert!(task.start(move |cancel| spawn_waiting(cancel, e)));
    let e = Arc::clone(&exits);
    assert!(!task.start(move |cancel| spawn_waiting(cancel, e)));

    task.stop().await;
    assert_eq!(exits.load(Ordering::SeqCst), 1, "only one loop was spawned");
}

#[tokio::test]
async fn task_can_restart_after_stop() {
    let task = PeriodicTask::new("test");
    let exits = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let e = Arc::clone(&exits);
        assert!(task.start(move |cancel| spawn_waiting(cancel, e)));
        task.stop().await;
    }
    assert_eq!(exits.load(Ordering::SeqCst), 2);
}
