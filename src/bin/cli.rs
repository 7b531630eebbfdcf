use clap::{value_parser, Arg, ArgMatches, Command};
use ens_runtime::{
    EnsError, Event, EventType, Result, Runtime, RuntimeConfigBuilder, SessionId,
};
use std::{
    collections::HashMap,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

const RESPONDER_INTERFACE: &str = "latency.responder";

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("ens-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ENS runtime latency tool")
        .subcommand_required(true)
        .subcommand(workload_args(
            Command::new("notify-echo").about("Measure notify round trips through an echoing responder"),
        ))
        .subcommand(workload_args(
            Command::new("request-echo").about("Measure blocking request/response latency"),
        ))
        .get_matches();

    match matches.subcommand() {
        Some(("notify-echo", sub_matches)) => run_notify_echo(&Options::from_matches(sub_matches)),
        Some(("request-echo", sub_matches)) => run_request_echo(&Options::from_matches(sub_matches)),
        _ => {
            println!("Use '--help' for usage information");
            Ok(())
        }
    }
}

fn workload_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("sessions")
                .short('s')
                .long("sessions")
                .value_name("SESSIONS")
                .help("Concurrent sessions")
                .value_parser(value_parser!(usize))
                .default_value("4"),
        )
        .arg(
            Arg::new("count")
                .short('c')
                .long("count")
                .value_name("COUNT")
                .help("Round trips per session")
                .value_parser(value_parser!(usize))
                .default_value("1000"),
        )
        .arg(
            Arg::new("payload")
                .short('p')
                .long("payload")
                .value_name("BYTES")
                .help("Payload size in bytes")
                .value_parser(value_parser!(usize))
                .default_value("64"),
        )
        .arg(
            Arg::new("max_threads")
                .short('t')
                .long("max-threads")
                .value_name("THREADS")
                .help("Upper bound on dispatch workers")
                .value_parser(value_parser!(usize))
                .default_value("16"),
        )
}

struct Options {
    sessions: usize,
    count: usize,
    payload: usize,
    max_threads: usize,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Self {
        let get = |name: &str| matches.get_one::<usize>(name).copied().unwrap_or_default();
        Self {
            sessions: get("sessions").max(1),
            count: get("count"),
            payload: get("payload"),
            max_threads: get("max_threads").max(1),
        }
    }

    fn runtime(&self) -> Result<Runtime> {
        let config = RuntimeConfigBuilder::new("ens-cli")
            .threads(1, self.max_threads)
            .request_timeout(Duration::from_secs(10))
            .build()?;
        Runtime::new(config)
    }
}

/// Echo notifies back unchanged; leave requests as their own response
fn responder(rt: &Runtime, event: &mut Event) {
    if event.kind == EventType::Notify {
        if let Some(data) = event.take_data() {
            if let Err(e) = rt.notify(event.session_id, event.sqn, data) {
                log::warn!("echo on session {} failed: {}", event.session_id, e);
            }
        }
    }
}

fn run_notify_echo(options: &Options) -> Result<()> {
    let rt = options.runtime()?;
    rt.register_interface(RESPONDER_INTERFACE, responder)?;

    println!(
        "notify-echo: {} sessions x {} round trips, {} byte payload",
        options.sessions, options.count, options.payload
    );

    // Echoes arrive on the caller endpoint; route them to the sending thread
    let waiters: Arc<Mutex<HashMap<SessionId, mpsc::Sender<u32>>>> = Arc::default();
    let routes = Arc::clone(&waiters);
    let caller = move |_: &Runtime, event: &mut Event| {
        if event.kind != EventType::Notify {
            return;
        }
        let route = routes.lock().ok().and_then(|map| map.get(&event.session_id).cloned());
        if let Some(route) = route {
            let _ = route.send(event.sqn);
        }
    };
    let caller: Arc<dyn ens_runtime::EventHandler> = Arc::new(caller);

    let start = Instant::now();
    let samples = thread::scope(|scope| -> Result<Vec<Duration>> {
        let mut workers = Vec::new();
        for _ in 0..options.sessions {
            let session = rt.session_start(RESPONDER_INTERFACE, Some(Arc::clone(&caller)))?;
            let (tx, rx) = mpsc::channel();
            if let Ok(mut map) = waiters.lock() {
                map.insert(session, tx);
            }

            let rt = &rt;
            workers.push(scope.spawn(move || -> Result<Vec<Duration>> {
                let mut latencies = Vec::with_capacity(options.count);
                for sqn in 1..=options.count as u32 {
                    let sent = Instant::now();
                    rt.notify(session, sqn, rt.alloc(options.payload)?)?;
                    loop {
                        let echoed = rx.recv_timeout(Duration::from_secs(10)).map_err(|_| {
                            EnsError::RequestTimeout {
                                session_id: session,
                                sqn,
                                timeout_ms: 10_000,
                            }
                        })?;
                        if echoed == sqn {
                            break;
                        }
                    }
                    latencies.push(sent.elapsed());
                }
                rt.session_end(session)?;
                Ok(latencies)
            }));
        }

        let mut samples = Vec::new();
        for worker in workers {
            match worker.join() {
                Ok(latencies) => samples.extend(latencies?),
                Err(_) => log::error!("session thread panicked"),
            }
        }
        Ok(samples)
    })?;

    report(&rt, samples, start.elapsed());
    rt.shutdown();
    Ok(())
}

fn run_request_echo(options: &Options) -> Result<()> {
    let rt = options.runtime()?;
    rt.register_interface(RESPONDER_INTERFACE, responder)?;

    println!(
        "request-echo: {} sessions x {} requests, {} byte payload",
        options.sessions, options.count, options.payload
    );

    let start = Instant::now();
    let samples = thread::scope(|scope| -> Result<Vec<Duration>> {
        let mut workers = Vec::new();
        for _ in 0..options.sessions {
            let session = rt.session_start(RESPONDER_INTERFACE, None)?;
            let rt = &rt;
            workers.push(scope.spawn(move || -> Result<Vec<Duration>> {
                let mut latencies = Vec::with_capacity(options.count);
                for sqn in 1..=options.count as u32 {
                    let request = rt.alloc(options.payload)?;
                    let sent = Instant::now();
                    let response = rt.request(session, sqn, request)?;
                    latencies.push(sent.elapsed());
                    if let Some(response) = response {
                        rt.free(response);
                    }
                }
                rt.session_end(session)?;
                Ok(latencies)
            }));
        }

        let mut samples = Vec::new();
        for worker in workers {
            match worker.join() {
                Ok(latencies) => samples.extend(latencies?),
                Err(_) => log::error!("session thread panicked"),
            }
        }
        Ok(samples)
    })?;

    report(&rt, samples, start.elapsed());
    rt.shutdown();
    Ok(())
}

fn report(rt: &Runtime, mut samples: Vec<Duration>, elapsed: Duration) {
    rt.wait_idle(Duration::from_secs(5));

    println!("\nResults:");
    println!("  Round trips: {}", samples.len());
    println!("  Total time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    if samples.is_empty() {
        return;
    }

    samples.sort_unstable();
    let percentile = |p: f64| {
        let index = ((samples.len() - 1) as f64 * p).round() as usize;
        samples[index].as_secs_f64() * 1_000_000.0
    };

    println!(
        "  Round trips/sec: {:.0}",
        samples.len() as f64 / elapsed.as_secs_f64()
    );
    println!("  p50: {:.2}μs", percentile(0.50));
    println!("  p90: {:.2}μs", percentile(0.90));
    println!("  p99: {:.2}μs", percentile(0.99));
    println!("  max: {:.2}μs", percentile(1.0));
    println!("\n{}", rt.stats().summary());
}
