mod test_harness;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use mantis_dispatch::run::{Run, RunQueue, RunState};
use test_harness::{ready_run, spec, FakeMantis, Harness};

#[test]
fn test_run_creation() {
    let run = Run::new(spec(10, &[(1, "0.5")]));
    assert_eq!(run.state(), RunState::Pending);
    assert_eq!(run.spec().n_years, 10);
    assert_eq!(run.spec().modifications.len(), 1);
}

#[test]
fn test_mark_ready_once() {
    let run = Run::new(spec(1, &[]));
    run.mark_ready().unwrap();
    assert_eq!(run.state(), RunState::Ready);
    assert!(run.mark_ready().is_err());
}

#[test]
fn test_run_queue_operations() {
    let mut queue = RunQueue::new();

    let pending = Arc::new(Run::new(spec(1, &[])));
    let ready = ready_run(spec(1, &[]));
    let pending_id = pending.id();

    assert!(queue.add_run(pending));
    assert!(queue.add_run(ready.clone()));

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.all_runs().len(), 2);
    assert_eq!(queue.ready_runs().len(), 1);
    assert_eq!(queue.ready_runs()[0].id(), ready.id());
    assert_eq!(queue.count_in(RunState::Pending), 1);

    let retrieved = queue.get_run(&pending_id).unwrap();
    assert_eq!(retrieved.state(), RunState::Pending);
    assert!(queue.get_run(&Uuid::new_v4()).is_none());
}

#[test]
fn test_ready_runs_oldest_first() {
    let mut queue = RunQueue::new();
    let now = Utc::now();

    let newer = Arc::new(Run::with_id(
        Uuid::new_v4(),
        spec(1, &[]),
        now,
    ));
    let older = Arc::new(Run::with_id(
        Uuid::new_v4(),
        spec(1, &[]),
        now - chrono::Duration::seconds(60),
    ));
    newer.mark_ready().unwrap();
    older.mark_ready().unwrap();

    queue.add_run(newer.clone());
    queue.add_run(older.clone());

    let ready = queue.ready_runs();
    assert_eq!(ready[0].id(), older.id());
    assert_eq!(ready[1].id(), newer.id());
}

#[test]
fn test_queue_capacity_and_duplicates() {
    let mut queue = RunQueue::with_capacity(2);
    let first = ready_run(spec(1, &[]));

    assert!(queue.add_run(first.clone()));
    assert!(!queue.add_run(first.clone()));
    assert!(queue.add_run(ready_run(spec(1, &[]))));
    assert!(queue.is_full());
    assert!(!queue.add_run(ready_run(spec(1, &[]))));
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn test_settled_and_cleanup() {
    let mantis = FakeMantis::replying(b"bad").await;
    let good = FakeMantis::mantis(1).await;
    let harness = Harness::new(vec![mantis.server.clone()]);
    harness.all_online();

    let mut queue = RunQueue::new();
    assert!(queue.is_settled());

    let failed = ready_run(spec(1, &[]));
    queue.add_run(failed.clone());
    assert!(!queue.is_settled());

    harness.dispatcher.dispatch(&failed).await.unwrap_err();
    assert_eq!(failed.state(), RunState::Failed);
    assert!(queue.is_settled());

    let other = Harness::new(vec![good.server.clone()]);
    other.all_online();
    let complete = ready_run(spec(1, &[]));
    queue.add_run(complete.clone());
    other.dispatcher.dispatch(&complete).await.unwrap();

    let waiting = Arc::new(Run::new(spec(1, &[])));
    queue.add_run(waiting.clone());

    assert_eq!(queue.cleanup_finished_runs(), 2);
    assert_eq!(queue.len(), 1);
    assert!(queue.get_run(&waiting.id()).is_some());
}
