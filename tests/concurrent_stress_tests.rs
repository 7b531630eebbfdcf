//! Concurrent stress tests for high-contention scenarios
//! Tests focused on lifecycle races, buffer accounting and pool elasticity under load

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use ens_runtime::{EnsError, Event, EventType, Runtime, RuntimeConfigBuilder, SessionId};

fn stress_runtime(name: &str) -> Runtime {
    let config = RuntimeConfigBuilder::new(name)
        .size_class(256, 512)
        .size_class(4096, 64)
        .threads(2, 32)
        .request_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    Runtime::new(config).unwrap()
}

#[cfg(test)]
mod concurrent_stress_tests {
    use super::*;

    /// Test: Many threads start, use and end sessions concurrently
    #[test]
    fn stress_session_churn() {
        let rt = stress_runtime("churn");
        let terminals = Arc::new(Mutex::new(Vec::<(SessionId, EventType)>::new()));
        let seen = Arc::clone(&terminals);
        rt.register_interface("stress.echo", move |_: &Runtime, event: &mut Event| {
            if event.kind.is_terminal() {
                seen.lock().unwrap().push((event.session_id, event.kind));
            }
        })
        .unwrap();

        let thread_count = 8;
        let sessions_per_thread = 25;
        let barrier = Arc::new(Barrier::new(thread_count));

        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let rt = rt.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut ids = Vec::new();
                    for i in 0..sessions_per_thread {
                        let session = rt.session_start("stress.echo", None).unwrap();
                        let request = rt.alloc_from(&(i as u32).to_le_bytes()).unwrap();
                        let response = rt.request(session, 1, request).unwrap().unwrap();
                        assert_eq!(response.as_slice(), &(i as u32).to_le_bytes());
                        rt.notify(session, 2, rt.alloc(16).unwrap()).unwrap();
                        rt.session_end(session).unwrap();
                        ids.push(session);
                    }
                    ids
                })
            })
            .collect();

        let mut callers = Vec::new();
        for handle in handles {
            callers.extend(handle.join().unwrap());
        }
        assert!(rt.wait_idle(Duration::from_secs(10)));

        let total = thread_count * sessions_per_thread;
        let terminals = terminals.lock().unwrap();
        // Both endpoints of every session close exactly once
        assert_eq!(terminals.len(), total * 2);
        let mut ids: Vec<_> = terminals.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total * 2);
        for caller in &callers {
            assert!(ids.contains(caller));
        }

        let stats = rt.stats();
        assert_eq!(stats.sessions.sessions_started, total as u64);
        assert_eq!(stats.sessions.active_endpoints, 0);
        assert_eq!(stats.pool.currently_in_use, 0);
        assert_eq!(stats.transactions.pending, 0);
    }

    /// Test: Requests racing with session end never hang and never leak buffers
    #[test]
    fn stress_requests_racing_end() {
        let rt = stress_runtime("racing");
        rt.register_interface("stress.slow", |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Request {
                thread::sleep(Duration::from_millis(u64::from(event.sqn % 5)));
            }
        })
        .unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));

        for round in 0..10 {
            let session = rt.session_start("stress.slow", None).unwrap();
            let requesters: Vec<_> = (1..=8u32)
                .map(|sqn| {
                    let rt = rt.clone();
                    let completed = Arc::clone(&completed);
                    let terminated = Arc::clone(&terminated);
                    thread::spawn(move || {
                        let request = match rt.alloc(64) {
                            Ok(buffer) => buffer,
                            Err(e) => panic!("pool exhausted in round {}: {}", round, e),
                        };
                        match rt.request(session, sqn, request) {
                            Ok(_) => completed.fetch_add(1, Ordering::Relaxed),
                            Err(EnsError::SessionTerminated { .. })
                            | Err(EnsError::SessionNotFound { .. }) => {
                                terminated.fetch_add(1, Ordering::Relaxed)
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        };
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(2));
            rt.session_end(session).unwrap();

            for requester in requesters {
                requester.join().unwrap();
            }
        }

        assert!(rt.wait_idle(Duration::from_secs(10)));
        assert_eq!(
            completed.load(Ordering::Relaxed) + terminated.load(Ordering::Relaxed),
            80
        );

        let stats = rt.stats();
        assert_eq!(stats.pool.currently_in_use, 0);
        assert_eq!(stats.transactions.pending, 0);
        assert_eq!(stats.sessions.active_endpoints, 0);
    }

    /// Test: Notify floods on shared sessions are all delivered
    #[test]
    fn stress_notify_flood() {
        let rt = stress_runtime("flood");
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        rt.register_interface("stress.sink", move |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Notify {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();

        let sessions: Vec<_> = (0..4)
            .map(|_| rt.session_start("stress.sink", None).unwrap())
            .collect();

        let thread_count = 4;
        let per_thread = 500;
        let handles: Vec<_> = (0..thread_count)
            .map(|t| {
                let rt = rt.clone();
                let session = sessions[t % sessions.len()];
                thread::spawn(move || {
                    let mut sent = 0;
                    for i in 0..per_thread {
                        let sqn = (i + 1) as u32;
                        // Back off while every buffer is in flight
                        let buffer = loop {
                            match rt.alloc(32) {
                                Ok(buffer) => break buffer,
                                Err(EnsError::PoolExhausted { .. }) => thread::yield_now(),
                                Err(e) => panic!("unexpected error: {}", e),
                            }
                        };
                        if rt.notify(session, sqn, buffer).is_ok() {
                            sent += 1;
                        }
                    }
                    sent
                })
            })
            .collect();

        let sent: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(rt.wait_idle(Duration::from_secs(10)));
        assert_eq!(received.load(Ordering::Relaxed), sent);
        assert_eq!(rt.stats().pool.currently_in_use, 0);
    }

    /// Test: Blocking requests from every worker at once still drain the queue
    #[test]
    fn stress_pool_growth_under_blocking() {
        let config = RuntimeConfigBuilder::new("growth")
            .size_class(256, 128)
            .threads(1, 4)
            .request_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        rt.register_interface("stress.leaf", |_: &Runtime, event: &mut Event| {
            if event.kind == EventType::Request {
                thread::sleep(Duration::from_millis(10));
            }
        })
        .unwrap();
        rt.register_interface("stress.relay", |rt: &Runtime, event: &mut Event| {
            if event.kind != EventType::Notify {
                return;
            }
            let Some(data) = event.take_data() else { return };
            let leaf = rt.session_start("stress.leaf", None).unwrap();
            rt.request(leaf, event.sqn, data).unwrap();
            rt.session_end(leaf).unwrap();
        })
        .unwrap();

        let session = rt.session_start("stress.relay", None).unwrap();
        let start = Instant::now();
        for sqn in 1..=16 {
            rt.notify(session, sqn, rt.alloc(8).unwrap()).unwrap();
        }
        assert!(rt.wait_idle(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(10));

        let stats = rt.stats();
        assert_eq!(stats.dispatch.handler_panics, 0);
        assert_eq!(stats.dispatch.blocked_threads, 0);
        assert_eq!(stats.transactions.responses_matched, 16);
        assert_eq!(stats.pool.currently_in_use, 0);
    }
}
