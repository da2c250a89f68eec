#![cfg(unix)]

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use basevar::pipeline::{SchedulerError, WorkerPool};

fn sh(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[test]
fn successful_workers_complete() {
    let pool = WorkerPool::spawn(vec![(0, sh("exit 0")), (1, sh("sleep 0.1"))])
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    assert_eq!(pool.len(), 2);
    pool.wait(&AtomicBool::new(false)).unwrap();
}

#[test]
fn failing_worker_stops_its_siblings() {
    let started = Instant::now();
    let pool = WorkerPool::spawn(vec![(0, sh("sleep 30")), (1, sh("exit 3"))])
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));

    let err = pool.wait(&AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerFailed { index: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancellation_terminates_all_workers() {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        flag.store(true, Ordering::SeqCst);
    });

    let started = Instant::now();
    let pool = WorkerPool::spawn(vec![(0, sh("sleep 30")), (1, sh("sleep 30"))])
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
    let err = pool.wait(&cancel).unwrap_err();
    trigger.join().unwrap();

    assert!(matches!(err, SchedulerError::Interrupted));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn missing_program_is_a_spawn_error() {
    let err = WorkerPool::spawn(vec![
        (0, sh("sleep 30")),
        (1, Command::new("/definitely/not/a/program")),
    ])
    .unwrap_err();
    assert!(matches!(err, SchedulerError::Spawn { index: 1, .. }));
}
