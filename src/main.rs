use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use dashmap::DashMap;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use transcode_fleet::alert::TracingAlertSink;
use transcode_fleet::backoff::BackoffPolicy;
use transcode_fleet::clock::SystemClock;
use transcode_fleet::config::FleetConfig;
use transcode_fleet::connection::Reconnector;
use transcode_fleet::coordinator::{Coordinator, FleetSnapshot};
use transcode_fleet::media::{LatencyMode, Resolution};
use transcode_fleet::scheduler::JobSpec;
use transcode_fleet::shutdown::install_shutdown_handler;
use transcode_fleet::worker::{
    EncodedOutput, Encoder, HeartbeatSender, TranscodeRequest, WorkerCapabilities,
};
use transcode_fleet::{FleetError, Result};

#[derive(Parser, Debug)]
#[command(name = "fleetd")]
#[command(version)]
#[command(about = "Transcoding worker fleet and job dispatch engine")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a simulated fleet until every job reaches a terminal state
    Simulate(SimulateArgs),

    /// Print the reconnection delay schedule for a backoff policy
    Backoff(BackoffCommand),
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    /// Number of simulated workers
    #[arg(long, default_value = "3")]
    workers: u32,

    /// Concurrent job capacity of each worker
    #[arg(long, default_value = "2")]
    capacity: u32,

    /// How many of the workers can produce 4K output
    #[arg(long, default_value = "1")]
    high_res_workers: u32,

    /// Number of jobs to submit
    #[arg(long, default_value = "10")]
    jobs: usize,

    /// Every Nth job targets 2160p (0 disables)
    #[arg(long, default_value = "4")]
    uhd_every: usize,

    /// Request adaptive-bitrate ladders
    #[arg(long)]
    adaptive: bool,

    /// Latency mode for submitted jobs (normal, low, ultra-low)
    #[arg(long, default_value = "normal")]
    latency: LatencyMode,

    /// Simulated encode time per variant
    #[arg(long, default_value = "200")]
    encode_ms: u64,

    /// Every Nth encode fails (0 disables)
    #[arg(long, default_value = "0")]
    fail_every: usize,

    /// Live-stream sessions to open and disconnect
    #[arg(long, default_value = "0")]
    sessions: usize,

    /// Reconnect attempts that fail before a session comes back
    #[arg(long, default_value = "2")]
    reconnect_failures: u32,

    #[command(flatten)]
    backoff: BackoffArgs,

    /// Pause between dispatch cycles
    #[arg(long, default_value = "100")]
    dispatch_interval_ms: u64,

    /// Queued jobs considered per dispatch cycle
    #[arg(long, default_value = "32")]
    batch_limit: usize,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct BackoffArgs {
    /// Delay before the first reconnect attempt
    #[arg(long, default_value = "1000")]
    initial_delay_ms: u64,

    /// Growth factor between attempts
    #[arg(long, default_value = "2.0")]
    multiplier: f64,

    /// Upper bound on any single delay
    #[arg(long, default_value = "60000")]
    max_delay_ms: u64,

    /// Attempts before failing over
    #[arg(long, default_value = "5")]
    max_attempts: u32,
}

#[derive(clap::Args, Debug)]
struct BackoffCommand {
    #[command(flatten)]
    policy: BackoffArgs,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

impl BackoffArgs {
    fn policy(&self) -> Result<BackoffPolicy> {
        BackoffPolicy::new(
            Duration::from_millis(self.initial_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }
}

// =============================================================================
// Simulated collaborators
// =============================================================================

struct SimulatedEncoder {
    encode_time: Duration,
    fail_every: usize,
    calls: AtomicUsize,
    in_flight: Arc<DashMap<String, Arc<AtomicU32>>>,
}

#[async_trait]
impl Encoder for SimulatedEncoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<EncodedOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = self
            .in_flight
            .entry(request.worker_id.clone())
            .or_default()
            .clone();
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.encode_time).await;
        counter.fetch_sub(1, Ordering::SeqCst);

        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(FleetError::EncodingFailed(format!(
                "simulated encoder crash on {}",
                request.input_ref
            )));
        }

        let (width, height) = request.resolution.dimensions();
        let duration_secs = 30.0;
        Ok(EncodedOutput {
            width,
            height,
            bitrate_kbps: request.bitrate_kbps,
            size_bytes: (request.bitrate_kbps as f64 * 1000.0 / 8.0 * duration_secs) as u64,
            duration_secs,
            storage_ref: format!("sim://{}/{}.mp4", request.job_id, request.resolution),
        })
    }
}

struct FlakyReconnector {
    failures_before_success: u32,
}

#[async_trait]
impl Reconnector for FlakyReconnector {
    async fn reconnect(&self, session_id: &str, attempt: u32) -> Result<()> {
        if attempt <= self.failures_before_success {
            return Err(FleetError::Internal(format!(
                "ingest for {} still unreachable",
                session_id
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Serialize)]
struct BackoffScheduleOutput {
    attempt: u32,
    delay_ms: u64,
}

fn print_snapshot(snapshot: &FleetSnapshot, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(snapshot)
                .map_err(|e| FleetError::Internal(e.to_string()))?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!(
                "{:<12} {:>8} {:>6} {:>8} {:>8}",
                "WORKER", "HEALTHY", "JOBS", "CAPACITY", "LOAD"
            );
            for w in &snapshot.workers {
                println!(
                    "{:<12} {:>8} {:>6} {:>8} {:>7.1}%",
                    w.id,
                    w.healthy,
                    w.current_jobs,
                    w.max_capacity,
                    w.load_percent()
                );
            }
            println!();
            println!(
                "{:<36} {:<8} {:<11} {:>5} {:<10} {:>7}",
                "JOB", "TARGET", "STATUS", "PROG", "WORKER", "OUTPUTS"
            );
            for j in &snapshot.jobs {
                println!(
                    "{:<36} {:<8} {:<11} {:>4.0}% {:<10} {:>7}",
                    j.id,
                    j.target_resolution.to_string(),
                    j.status.to_string(),
                    j.progress,
                    j.assigned_worker.as_deref().unwrap_or("-"),
                    j.outputs.len()
                );
                if let Some(ref error) = j.error {
                    println!("    error: {}", error);
                }
            }
            if !snapshot.connections.is_empty() {
                println!();
                println!("{:<12} {:<12} {:>8}", "SESSION", "STATUS", "ATTEMPTS");
                for c in &snapshot.connections {
                    println!(
                        "{:<12} {:<12} {:>5}/{}",
                        c.session_id,
                        c.status.to_string(),
                        c.attempt_count,
                        c.max_attempts
                    );
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn run_simulation(args: SimulateArgs) -> Result<()> {
    let config = FleetConfig::default()
        .with_dispatch_interval(Duration::from_millis(args.dispatch_interval_ms))
        .with_batch_limit(args.batch_limit)
        .with_reconnect(args.backoff.policy()?);

    let in_flight: Arc<DashMap<String, Arc<AtomicU32>>> = Arc::new(DashMap::new());
    let encoder = Arc::new(SimulatedEncoder {
        encode_time: Duration::from_millis(args.encode_ms),
        fail_every: args.fail_every,
        calls: AtomicUsize::new(0),
        in_flight: in_flight.clone(),
    });
    let reconnector = Arc::new(FlakyReconnector {
        failures_before_success: args.reconnect_failures,
    });

    let coordinator = Arc::new(Coordinator::in_memory(
        config,
        Arc::new(SystemClock),
        encoder,
        reconnector,
        Arc::new(TracingAlertSink),
    )?);

    let cancel = install_shutdown_handler();
    let mut heartbeats = tokio::task::JoinSet::new();
    let mut reconnects = tokio::task::JoinSet::new();

    for i in 0..args.workers {
        let id = format!("worker-{}", i + 1);
        let mut caps = WorkerCapabilities::software();
        if i < args.high_res_workers {
            caps = caps.with_high_res();
        }
        let address = format!("127.0.0.1:{}", 7000 + i);
        coordinator
            .register_worker_at(&id, Some(address), args.capacity, caps)
            .await?;

        let counter = in_flight.entry(id.clone()).or_default().clone();
        let registry = coordinator.registry().clone();
        let token = cancel.clone();
        heartbeats.spawn(async move {
            HeartbeatSender::new(10_000)
                .run(registry, id, counter, token)
                .await;
        });
    }

    for i in 0..args.jobs {
        let resolution = if args.uhd_every > 0 && (i + 1) % args.uhd_every == 0 {
            Resolution::P2160
        } else {
            Resolution::P1080
        };
        let mut spec = JobSpec::new(format!("sim://input/{}.mov", i + 1), resolution)
            .with_latency_mode(args.latency);
        if args.adaptive {
            spec = spec.with_adaptive_bitrate();
        }
        coordinator.submit(spec).await?;
    }

    for i in 0..args.sessions {
        let session_id = format!("stream-{}", i + 1);
        coordinator.monitor().open_session(&session_id);
        let monitor = coordinator.monitor().clone();
        let token = cancel.clone();
        reconnects.spawn(async move {
            if let Err(e) = monitor.handle_disconnect(&session_id, token).await {
                tracing::warn!(session_id = %session_id, error = %e, "Reconnection loop failed");
            }
        });
    }

    let runner = {
        let coordinator = coordinator.clone();
        let token = cancel.clone();
        tokio::spawn(async move { coordinator.run(token).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(timeout_secs = args.timeout_secs, "Simulation deadline reached");
                break;
            }
            _ = poll.tick() => {
                let snapshot = coordinator.snapshot().await?;
                let jobs_done = snapshot.jobs.iter().all(|j| j.status.is_terminal());
                if jobs_done && reconnects.is_empty() {
                    break;
                }
            }
            Some(_) = reconnects.join_next(), if !reconnects.is_empty() => {}
        }
    }

    cancel.cancel();
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "Coordinator task panicked");
    }
    while reconnects.join_next().await.is_some() {}
    while heartbeats.join_next().await.is_some() {}

    print_snapshot(&coordinator.snapshot().await?, &args.output)
}

fn print_backoff(args: BackoffArgs, format: &OutputFormat) -> Result<()> {
    let policy = args.policy()?;
    let schedule: Vec<BackoffScheduleOutput> = policy
        .schedule()
        .into_iter()
        .zip(1..)
        .map(|(delay, attempt)| BackoffScheduleOutput {
            attempt,
            delay_ms: delay.as_millis() as u64,
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&schedule)
                .map_err(|e| FleetError::Internal(e.to_string()))?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{:<8} {:>10}", "ATTEMPT", "DELAY_MS");
            for entry in &schedule {
                println!("{:<8} {:>10}", entry.attempt, entry.delay_ms);
            }
            println!("failover after attempt {}", policy.max_attempts());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Simulate(sim) => run_simulation(sim).await?,
        Commands::Backoff(cmd) => print_backoff(cmd.policy, &cmd.output)?,
    }
    Ok(())
}
