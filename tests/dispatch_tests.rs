//! Dispatch engine tests: pool growth, concurrency, panic containment and back-pressure

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use ens_runtime::{EnsError, Event, EventType, Runtime, RuntimeConfigBuilder};

fn settle(rt: &Runtime) {
    assert!(rt.wait_idle(Duration::from_secs(5)), "runtime did not settle");
}

/// One-shot latch that event functions can park on
struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            opened: Condvar::new(),
        })
    }

    fn wait(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut open = self.open.lock().unwrap();
        while !*open {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            open = self.opened.wait_timeout(open, deadline - now).unwrap().0;
        }
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;

    /// Test: A request made from inside an event function does not starve a single-thread pool
    #[test]
    fn test_nested_request_grows_pool() {
        let config = RuntimeConfigBuilder::new("nested")
            .size_class(256, 16)
            .threads(1, 1)
            .request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        rt.register_interface("svc.back", |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Request {
                if let Some(data) = event.data.as_mut() {
                    data.as_mut_slice().reverse();
                }
            }
        })
        .unwrap();

        rt.register_interface("svc.front", |rt: &Runtime, event: &mut Event| {
            if event.kind != EventType::Request {
                return;
            }
            let Some(data) = event.take_data() else { return };
            let back = rt.session_start("svc.back", None).unwrap();
            if let Ok(Some(response)) = rt.request(back, 1, data) {
                event.respond(response);
            }
            rt.session_end(back).unwrap();
        })
        .unwrap();

        let session = rt.session_start("svc.front", None).unwrap();
        let response = rt
            .request(session, 1, rt.alloc_from(b"abc").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(response.as_slice(), b"cba");

        let stats = rt.stats().dispatch;
        assert!(stats.threads_spawned >= 2);
    }

    /// Test: Blocked workers do not count, so chained requests all complete
    #[test]
    fn test_chained_requests_complete() {
        let config = RuntimeConfigBuilder::new("chain")
            .size_class(256, 32)
            .threads(1, 2)
            .request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        // Each hop forwards the request one level deeper
        for level in 0..4 {
            let next = format!("chain.level{}", level + 1);
            rt.register_interface(&format!("chain.level{}", level), move |rt: &Runtime, event: &mut Event| {
                if event.kind != EventType::Request {
                    return;
                }
                let Some(mut data) = event.take_data() else { return };
                let hop = data.len();
                data.write(hop, &[level as u8]).unwrap();
                let session = rt.session_start(&next, None).unwrap();
                if let Ok(Some(response)) = rt.request(session, 1, data) {
                    event.respond(response);
                }
                rt.session_end(session).unwrap();
            })
            .unwrap();
        }
        rt.register_interface("chain.level4", |_: &Runtime, _: &mut Event| {})
            .unwrap();

        let session = rt.session_start("chain.level0", None).unwrap();
        let response = rt
            .request(session, 1, rt.alloc(0).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(response.as_slice(), &[0, 1, 2, 3]);
    }

    /// Test: One event function runs concurrently for events of the same session
    #[test]
    fn test_concurrent_events_on_one_session() {
        let config = RuntimeConfigBuilder::new("parallel")
            .size_class(256, 16)
            .threads(4, 8)
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max) = (Arc::clone(&running), Arc::clone(&peak));
        rt.register_interface("svc.parallel", move |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                current.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let session = rt.session_start("svc.parallel", None).unwrap();
        settle(&rt);
        for sqn in 1..=4 {
            rt.notify(session, sqn, rt.alloc(8).unwrap()).unwrap();
        }
        settle(&rt);

        assert!(peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(rt.stats().dispatch.events_delivered, 4);
    }

    /// Test: A panicking event function is contained and the session keeps working
    #[test]
    fn test_panic_is_contained() {
        let config = RuntimeConfigBuilder::new("panics")
            .size_class(256, 16)
            .threads(1, 2)
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        rt.register_interface("svc.fragile", move |_: &Runtime, event: &mut Event| {
            if event.kind != EventType::Notify {
                return;
            }
            if event.sqn == 1 {
                panic!("first notify fails");
            }
            let _ = tx.lock().unwrap().send(event.sqn);
        })
        .unwrap();

        let session = rt.session_start("svc.fragile", None).unwrap();
        rt.notify(session, 1, rt.alloc(8).unwrap()).unwrap();
        rt.notify(session, 2, rt.alloc(8).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);

        // Lifecycle events still flow after the panic
        rt.session_end(session).unwrap();
        settle(&rt);

        let stats = rt.stats();
        assert_eq!(stats.dispatch.handler_panics, 1);
        assert_eq!(stats.sessions.endpoints_ended, 2);
        assert_eq!(stats.pool.currently_in_use, 0);
    }

    /// Test: A full dispatch queue is reported to the sender
    #[test]
    fn test_full_queue_rejects() {
        let config = RuntimeConfigBuilder::new("backpressure")
            .size_class(256, 16)
            .threads(1, 1)
            .queue_depth(1)
            .no_stall_growth()
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        let gate = Gate::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let held = Arc::clone(&gate);
        rt.register_interface("svc.slow", move |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify && event.sqn == 1 {
                let _ = entered_tx.lock().unwrap().send(());
                held.wait();
            }
        })
        .unwrap();

        let session = rt.session_start("svc.slow", None).unwrap();
        settle(&rt);

        // First occupies the only worker, second fills the queue
        rt.notify(session, 1, rt.alloc(8).unwrap()).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rt.notify(session, 2, rt.alloc(8).unwrap()).unwrap();

        let rejected = rt.notify(session, 3, rt.alloc(8).unwrap());
        assert!(matches!(rejected, Err(EnsError::DispatchRejected { .. })));

        gate.open();
        settle(&rt);

        let stats = rt.stats();
        assert!(stats.dispatch.jobs_rejected >= 1);
        assert!(stats.dispatch.delivery_failures >= 1);
        assert_eq!(stats.pool.currently_in_use, 0);

        // The rejection did not disturb the session's lifecycle
        rt.session_end(session).unwrap();
        settle(&rt);
        assert_eq!(rt.stats().sessions.active_endpoints, 0);
    }

    /// Test: Idle workers above the minimum retire after the keep-alive
    #[test]
    fn test_surplus_workers_retire() {
        let config = RuntimeConfigBuilder::new("elastic")
            .size_class(256, 16)
            .threads(1, 8)
            .keep_alive(Duration::from_millis(50))
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        rt.register_interface("svc.sleepy", |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                thread::sleep(Duration::from_millis(50));
            }
        })
        .unwrap();

        let session = rt.session_start("svc.sleepy", None).unwrap();
        settle(&rt);
        for sqn in 1..=6 {
            rt.notify(session, sqn, rt.alloc(8).unwrap()).unwrap();
        }
        settle(&rt);
        assert!(rt.stats().dispatch.threads_spawned > 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while rt.stats().dispatch.threads > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        let stats = rt.stats().dispatch;
        assert_eq!(stats.threads, 1);
        assert!(stats.threads_retired >= 1);
    }

    /// Test: Handlers that mark a foreign wait as blocking leave room for other sessions
    #[test]
    fn test_marked_blocking_handlers_do_not_starve_others() {
        let config = RuntimeConfigBuilder::new("marked")
            .size_class(256, 16)
            .threads(1, 2)
            .no_stall_growth()
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        let gate = Gate::new();
        let held = Arc::clone(&gate);
        rt.register_interface("svc.waiter", move |rt: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                let _blocking = rt.enter_blocking();
                held.wait();
            }
        })
        .unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        rt.register_interface("svc.quick", move |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                let _ = tx.lock().unwrap().send(event.sqn);
            }
        })
        .unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| rt.session_start("svc.waiter", None).unwrap())
            .collect();
        let quick = rt.session_start("svc.quick", None).unwrap();
        settle(&rt);

        for &session in &waiters {
            rt.notify(session, 1, rt.alloc(8).unwrap()).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while rt.stats().dispatch.blocked_threads < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(rt.stats().dispatch.blocked_threads, 2);

        rt.notify(quick, 9, rt.alloc(8).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 9);

        gate.open();
        settle(&rt);
        assert_eq!(rt.stats().dispatch.blocked_threads, 0);
        assert_eq!(rt.stats().dispatch.stall_spawns, 0);
    }

    /// Test: Handlers blocking without saying so still cannot stall other sessions for long
    #[test]
    fn test_stalled_queue_gets_extra_worker() {
        let config = RuntimeConfigBuilder::new("stalled")
            .size_class(256, 16)
            .threads(1, 2)
            .stall_threshold(Duration::from_millis(100))
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        let gate = Gate::new();
        let held = Arc::clone(&gate);
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        rt.register_interface("svc.waiter", move |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                let _ = entered_tx.lock().unwrap().send(());
                held.wait();
            }
        })
        .unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        rt.register_interface("svc.quick", move |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                let _ = tx.lock().unwrap().send(event.sqn);
            }
        })
        .unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| rt.session_start("svc.waiter", None).unwrap())
            .collect();
        let quick = rt.session_start("svc.quick", None).unwrap();
        settle(&rt);

        for &session in &waiters {
            rt.notify(session, 1, rt.alloc(8).unwrap()).unwrap();
        }
        for _ in 0..2 {
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        rt.notify(quick, 9, rt.alloc(8).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 9);
        assert!(rt.stats().dispatch.stall_spawns >= 1);

        gate.open();
        settle(&rt);
        assert_eq!(rt.stats().pool.currently_in_use, 0);
    }
}
