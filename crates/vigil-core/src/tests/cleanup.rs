use std::sync::{Arc, Mutex};

use crate::cleanup::CleanupContext;

#[test]
fn cleanup_runs_callbacks_in_reverse_order() {
    let ctx = CleanupContext::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for step in ["cancel scope", "release lock", "close live entry"] {
        let order = Arc::clone(&order);
        ctx.add_cleanup(step, move || order.lock().unwrap().push(step));
    }
    assert_eq!(ctx.len(), 3);

    ctx.cleanup();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["close live entry", "release lock", "cancel scope"]
    );
    assert!(ctx.is_empty());
}

#[test]
fn second_cleanup_runs_nothing() {
    let ctx = CleanupContext::new();
    let calls = Arc::new(Mutex::new(0));
    {
        let calls = Arc::clone(&calls);
        ctx.add_cleanup("count", move || *calls.lock().unwrap() += 1);
    }
    ctx.cleanup();
    ctx.cleanup();
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn callbacks_added_after_cleanup_run_on_next_cleanup() {
    let ctx = CleanupContext::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    ctx.cleanup();
    {
        let calls = Arc::clone(&calls);
        ctx.add_cleanup("late", move || calls.lock().unwrap().push("late"));
    }
    ctx.cleanup();
    assert_eq!(*calls.lock().unwrap(), vec!["late"]);
}

#[tokio::test]
async fn unwind_runs_on_blocking_pool() {
    let ctx = CleanupContext::new();
    let calls = Arc::new(Mutex::new(0));
    {
        let calls = Arc::clone(&calls);
        ctx.add_cleanup("blocking", move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            *calls.lock().unwrap() += 1;
        });
    }
    ctx.unwind().await;
    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(ctx.is_empty());
}
