//! Cleanup Handler behaviour: the drive is released once, however many
//! paths ask for it.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use shrinkwrap::mount::{DriveMounter, MountGuard, MountLease, UnmountOutcome};
use shrinkwrap::process_guard::CleanupHook;
use shrinkwrap::tool_runner::ToolOutput;

use common::{SHARE, net_use_output, scripted};

fn mounter(runner: Arc<shrinkwrap::testing::ScriptedRunner>) -> DriveMounter {
    DriveMounter::new(runner, "Z:", SHARE)
}

#[test]
fn test_release_twice_issues_one_delete() {
    let runner = scripted();
    runner.respond("net use query", ToolOutput::ok(net_use_output(SHARE)));

    let mut guard = MountGuard::register(mounter(runner.clone()));
    assert_eq!(guard.release(), UnmountOutcome::Unmounted);
    assert_eq!(guard.release(), UnmountOutcome::AlreadyReleased);
    drop(guard);

    assert_eq!(runner.count("net use delete"), 1);
}

#[test]
fn test_signal_hook_after_release_is_noop() {
    let runner = scripted();
    runner.respond("net use query", ToolOutput::ok(net_use_output(SHARE)));

    let mut guard = MountGuard::register(mounter(runner.clone()));
    let lease = guard.lease().clone();
    guard.release();

    // What the signal thread would do if it fired late
    lease.run_cleanup();
    assert!(lease.is_released());
    assert_eq!(runner.count("net use delete"), 1);
}

#[test]
fn test_concurrent_releases_converge() {
    let runner = scripted();
    runner.respond("net use query", ToolOutput::ok(net_use_output(SHARE)));
    let lease = Arc::new(MountLease::new(mounter(runner.clone())));
    let barrier = Arc::new(Barrier::new(2));

    let handle = {
        let lease = lease.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            lease.release()
        })
    };
    barrier.wait();
    let here = lease.release();
    let there = handle.join().unwrap();

    let mut outcomes = vec![here, there];
    outcomes.sort_by_key(|o| format!("{o:?}"));
    assert_eq!(
        outcomes,
        vec![UnmountOutcome::AlreadyReleased, UnmountOutcome::Unmounted]
    );
    assert_eq!(runner.count("net use delete"), 1);
}

#[test]
fn test_cleanup_when_nothing_mapped() {
    let runner = scripted();
    runner.respond("net use query", ToolOutput::failed(2, "not found"));

    let lease = MountLease::new(mounter(runner.clone()));
    assert_eq!(lease.release(), UnmountOutcome::NotMounted);
    assert_eq!(runner.count("net use delete"), 0);
}

#[test]
fn test_failed_unmount_is_a_warning_not_an_error() {
    let runner = scripted();
    runner.respond("net use query", ToolOutput::ok(net_use_output(SHARE)));
    runner.respond("net use delete", ToolOutput::failed(2, "There are open files"));

    let lease = MountLease::new(mounter(runner.clone()));
    assert_eq!(lease.release(), UnmountOutcome::Failed);
    // Still released: no retry loop from later paths
    assert_eq!(lease.release(), UnmountOutcome::AlreadyReleased);
}

#[test]
fn test_guard_drop_releases() {
    let runner = scripted();
    runner.respond("net use query", ToolOutput::ok(net_use_output(SHARE)));
    {
        let _guard = MountGuard::register(mounter(runner.clone()));
    }
    assert_eq!(runner.count("net use delete"), 1);
}
