use kernel_sync::hosted::ThreadScheduler;
use kernel_sync::{Cancelled, Scheduler, SleepLock, SpinLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

fn wait_for_waiters<T>(lock: &SleepLock<T>, n: usize) {
    while lock.waiters() < n {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn uncontended_lock_and_release() {
    let sched = ThreadScheduler::new();
    let lock = SleepLock::new("buffer", 0u32);

    {
        let mut g = lock.lock(&sched).unwrap();
        *g = 5;
        assert!(g.holding());
        assert!(lock.holding(&sched));
        assert!(lock.is_locked());
    }
    assert!(!lock.is_locked());
    assert!(!lock.holding(&sched));
    assert_eq!(*lock.lock(&sched).unwrap(), 5);
}

#[test]
fn try_lock_fails_while_held() {
    let sched = Arc::new(ThreadScheduler::new());
    let lock = Arc::new(SleepLock::new("buffer", ()));

    let g = lock.try_lock(&*sched).unwrap();
    {
        let (sched, lock) = (Arc::clone(&sched), Arc::clone(&lock));
        let other = thread::spawn(move || lock.try_lock(&*sched).is_none());
        assert!(other.join().unwrap());
    }
    drop(g);
    assert!(lock.try_lock(&*sched).is_some());
}

#[test]
#[should_panic(expected = "acquired it twice")]
fn recursive_acquire_is_fatal() {
    let sched = ThreadScheduler::new();
    let lock = SleepLock::new("buffer", ());
    let _g = lock.lock(&sched).unwrap();
    let _again = lock.lock(&sched);
}

#[test]
fn contended_holders_are_exclusive() {
    let threads = 6;
    let iters = 200;

    let sched = Arc::new(ThreadScheduler::new());
    let lock = Arc::new(SleepLock::new("buffer", 0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let (sched, lock, in_cs, start) = (
                Arc::clone(&sched),
                Arc::clone(&lock),
                Arc::clone(&in_cs),
                Arc::clone(&start),
            );
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    let mut g = lock.lock(&*sched).unwrap();
                    assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0);
                    *g += 1;
                    thread::yield_now();
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(&*sched).unwrap(), threads * iters);
    assert_eq!(lock.waiters(), 0);
}

#[test]
fn waiters_are_served_in_arrival_order() {
    let sched = Arc::new(ThreadScheduler::new());
    let lock = Arc::new(SleepLock::new("buffer", ()));
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = lock.lock(&*sched).unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let (sched, queued, order) = (Arc::clone(&sched), Arc::clone(&lock), Arc::clone(&order));
        handles.push(thread::spawn(move || {
            let _g = queued.lock(&*sched).unwrap();
            order.lock().unwrap().push(i);
        }));
        // Queue them one at a time so arrival order is known.
        wait_for_waiters(&lock, i + 1);
    }

    drop(held);
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn cancelled_waiter_reports_cancellation_and_leaves_queue() {
    let sched = Arc::new(ThreadScheduler::new());
    let lock = Arc::new(SleepLock::new("buffer", ()));

    let held = lock.lock(&*sched).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let waiter = {
        let (sched, lock) = (Arc::clone(&sched), Arc::clone(&lock));
        thread::spawn(move || {
            tx.send(sched.current_task()).unwrap();
            lock.lock(&*sched).map(|_| ())
        })
    };

    let task = rx.recv().unwrap();
    wait_for_waiters(&lock, 1);
    sched.cancel(task);

    assert_eq!(waiter.join().unwrap(), Err(Cancelled));
    assert_eq!(lock.waiters(), 0);
    assert!(lock.holding(&*sched), "cancellation must not disturb the holder");

    drop(held);
    assert!(!lock.is_locked());
}

#[test]
fn release_skips_nobody_after_a_cancellation() {
    let sched = Arc::new(ThreadScheduler::new());
    let lock = Arc::new(SleepLock::new("buffer", 0u32));

    let held = lock.lock(&*sched).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let doomed = {
        let (sched, lock) = (Arc::clone(&sched), Arc::clone(&lock));
        thread::spawn(move || {
            tx.send(sched.current_task()).unwrap();
            lock.lock(&*sched).is_err()
        })
    };
    let doomed_task = rx.recv().unwrap();
    wait_for_waiters(&lock, 1);

    let patient = {
        let (sched, lock) = (Arc::clone(&sched), Arc::clone(&lock));
        thread::spawn(move || {
            let mut g = lock.lock(&*sched).unwrap();
            *g += 1;
        })
    };
    wait_for_waiters(&lock, 2);

    sched.cancel(doomed_task);
    assert!(doomed.join().unwrap());

    drop(held);
    patient.join().unwrap();
    assert_eq!(*lock.lock(&*sched).unwrap(), 1);
}

#[test]
fn guards_over_sync_payloads_can_be_shared() {
    fn assert_send_sync<S: Send + Sync>(_: &S) {}

    let sched = ThreadScheduler::new();
    let lock = SleepLock::new("buffer", 0_u64);
    let guard = lock.lock(&sched).unwrap();
    assert_send_sync(&guard);

    let spin = SpinLock::new(0_u64);
    assert_send_sync(&spin.lock());
}
