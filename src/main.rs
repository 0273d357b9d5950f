use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use cowfs::config::{load_config, load_config_from};
use cowfs::object::ObjectAttrs;
use cowfs::{CowfsError, ExternalHandle, MemStore, Mount, MountConfig, ObjectId};

const RECORD: &[u8] = b"cowfs-rec";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> cowfs::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("COWFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            let config = match &args.config {
                Some(path) => load_config_from(path)?,
                None => load_config()?,
            };
            let report = run_workload(&args, config)?;
            if let Some(path) = &args.json_output {
                let file = std::fs::File::create(path)?;
                serde_json::to_writer_pretty(file, &report)?;
            }
            write_json_to_stdout(&report)?;
            Ok(if report.violations.is_empty() { 0 } else { 1 })
        }
        Command::DefaultConfig => {
            let toml_str = toml::to_string_pretty(&MountConfig::default())
                .map_err(|e| CowfsError::Config(format!("Failed to serialize config: {}", e)))?;
            print!("{}", toml_str);
            Ok(0)
        }
    }
}

fn write_json_to_stdout<T: Serialize>(value: &T) -> cowfs::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    out.flush()?;
    Ok(())
}

#[derive(Parser)]
#[command(author, version, about = "Concurrency stress workload for the cowfs object layer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workload and print a JSON report
    Run(RunArgs),
    /// Print the default mount configuration as TOML
    DefaultConfig,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Worker threads
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Distinct object numbers shared by all workers
    #[arg(long, default_value_t = 16)]
    objects: u64,

    /// Operations per worker in the mixed phase
    #[arg(long, default_value_t = 500)]
    iterations: u64,

    /// Mount config file (defaults to the user config location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write the report to this file
    #[arg(long)]
    json_output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report {
    started_at: chrono::DateTime<chrono::Utc>,
    threads: usize,
    objects: u64,
    iterations: u64,
    attach_calls: u64,
    ops_completed: u64,
    ops_refused_after_unmount: u64,
    evicted_at_unmount: usize,
    elapsed_ms: u128,
    violations: Vec<String>,
}

fn run_workload(args: &RunArgs, config: MountConfig) -> cowfs::Result<Report> {
    let started_at = chrono::Utc::now();
    let start = Instant::now();
    let threads = args.threads.max(1);
    let objects = args.objects.max(1);
    let mut violations = Vec::new();

    let store = Arc::new(MemStore::new());
    for n in 1..=objects {
        store.insert(ObjectId(n), ObjectAttrs::default(), Vec::new());
    }
    let mount = Mount::new(config, store.clone(), None)?;

    // Everyone opens every object at once; each object must be attached once.
    let barrier = Arc::new(Barrier::new(threads));
    let opened: Vec<HashMap<u64, ExternalHandle>> = (0..threads)
        .map(|_| {
            let mount = Arc::clone(&mount);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> cowfs::Result<HashMap<u64, ExternalHandle>> {
                barrier.wait();
                let op = mount.enter()?;
                (1..=objects)
                    .map(|n| -> cowfs::Result<(u64, ExternalHandle)> {
                        Ok((n, op.open(ObjectId(n))?))
                    })
                    .collect()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(join_worker)
        .collect::<cowfs::Result<_>>()?;

    let handles = opened[0].clone();
    if opened.iter().any(|m| *m != handles) {
        violations.push("threads observed different handles for the same object".to_string());
    }
    if store.attach_calls() != objects {
        violations.push(format!(
            "expected {} attachments, saw {}",
            objects,
            store.attach_calls()
        ));
    }
    let handles: Arc<Vec<ExternalHandle>> =
        Arc::new((1..=objects).map(|n| handles[&n]).collect());

    // Concurrent extension: every worker appends records at increasing offsets.
    let ops_completed = Arc::new(AtomicU64::new(0));
    let max_end: Vec<u64> = (0..threads)
        .map(|t| {
            let mount = Arc::clone(&mount);
            let handles = Arc::clone(&handles);
            let ops_completed = Arc::clone(&ops_completed);
            thread::spawn(move || -> cowfs::Result<Vec<u64>> {
                let op = mount.enter()?;
                let mut ends = vec![0u64; handles.len()];
                for round in 0..4u64 {
                    for (i, handle) in handles.iter().enumerate() {
                        let offset = (round * threads as u64 + t as u64) * RECORD.len() as u64;
                        op.write(*handle, offset, RECORD)?;
                        ends[i] = ends[i].max(offset + RECORD.len() as u64);
                        ops_completed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(ends)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(join_worker)
        .collect::<cowfs::Result<Vec<_>>>()?
        .into_iter()
        .fold(vec![0u64; handles.len()], |acc, ends| {
            acc.iter().zip(ends).map(|(a, b)| (*a).max(b)).collect()
        });

    {
        let op = mount.enter()?;
        for (handle, expected) in handles.iter().zip(&max_end) {
            let size = op.getattr(*handle)?.size;
            if size < *expected {
                violations.push(format!(
                    "{} size {} below furthest completed write {}",
                    handle, size, expected
                ));
            }
        }
    }

    // Mixed reads, writes, and truncates.
    (0..threads)
        .map(|t| {
            let mount = Arc::clone(&mount);
            let handles = Arc::clone(&handles);
            let ops_completed = Arc::clone(&ops_completed);
            let iterations = args.iterations;
            thread::spawn(move || -> cowfs::Result<()> {
                for i in 0..iterations {
                    let op = mount.enter()?;
                    let pick = fxhash::hash64(&(t, i));
                    let handle = handles[(pick % handles.len() as u64) as usize];
                    let offset = (pick >> 16) % 4096;
                    match pick % 10 {
                        0 => op.truncate(handle, offset)?,
                        1..=3 => {
                            op.write(handle, offset, RECORD)?;
                        }
                        _ => {
                            op.read(handle, offset, 256)?;
                        }
                    }
                    ops_completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(join_worker)
        .collect::<cowfs::Result<Vec<()>>>()?;

    // Quiescent: a whole-file read must return exactly the recorded size.
    {
        let op = mount.enter()?;
        for handle in handles.iter() {
            let size = op.getattr(*handle)?.size;
            let data = op.read(*handle, 0, size + 4096)?;
            if data.len() as u64 != size {
                violations.push(format!(
                    "{} read {} bytes but size is {}",
                    handle,
                    data.len(),
                    size
                ));
            }
        }
    }

    // Unmount while workers keep issuing operations.
    let stop = Arc::new(AtomicBool::new(false));
    let refused = Arc::new(AtomicU64::new(0));
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let mount = Arc::clone(&mount);
            let handles = Arc::clone(&handles);
            let stop = Arc::clone(&stop);
            let refused = Arc::clone(&refused);
            let ops_completed = Arc::clone(&ops_completed);
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Acquire) {
                    let handle = handles[(t + i as usize) % handles.len()];
                    let result = mount
                        .enter()
                        .and_then(|op| op.read(handle, 0, RECORD.len() as u64));
                    match result {
                        Ok(_) => {
                            ops_completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(CowfsError::Unavailable) => {
                            refused.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                        Err(e) => tracing::debug!("worker {} stopped: {}", t, e),
                    }
                    i += 1;
                }
            })
        })
        .collect();

    let evicted = mount.unmount()?;
    stop.store(true, Ordering::Release);
    for w in workers {
        if w.join().is_err() {
            violations.push("worker panicked during unmount".to_string());
        }
    }

    if mount.enter().is_ok() {
        violations.push("enter succeeded after unmount".to_string());
    }
    if mount.resident_count() != 0 {
        violations.push(format!(
            "{} objects still resident after unmount",
            mount.resident_count()
        ));
    }

    for violation in &violations {
        tracing::error!("invariant violation: {}", violation);
    }

    Ok(Report {
        started_at,
        threads,
        objects,
        iterations: args.iterations,
        attach_calls: store.attach_calls(),
        ops_completed: ops_completed.load(Ordering::Relaxed),
        ops_refused_after_unmount: refused.load(Ordering::Relaxed),
        evicted_at_unmount: evicted,
        elapsed_ms: start.elapsed().as_millis(),
        violations,
    })
}

fn join_worker<T>(handle: thread::JoinHandle<cowfs::Result<T>>) -> cowfs::Result<T> {
    handle
        .join()
        .map_err(|_| CowfsError::Io(std::io::Error::other("worker thread panicked")))?
}
