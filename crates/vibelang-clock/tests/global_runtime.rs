//! The process-wide runtime can only be created once.

use crossbeam_channel::unbounded;
use std::time::Duration;
use vibelang_clock::{global, init_global, Error, RuntimeConfig, Task};

#[test]
fn test_global_runtime_is_unique() {
    assert!(global().is_none());

    let config = RuntimeConfig::default().with_resync_enabled(false);
    let runtime = init_global(config.clone()).unwrap();
    assert!(std::ptr::eq(runtime, global().unwrap()));

    let err = init_global(config).unwrap_err();
    assert_eq!(err, Error::AlreadyInitialized("global runtime"));

    // The first runtime is untouched by the failed attempt.
    let (tx, rx) = unbounded();
    runtime
        .scheduler()
        .play(Task::call(move |_| {
            tx.send(())?;
            Ok(())
        }))
        .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
}
