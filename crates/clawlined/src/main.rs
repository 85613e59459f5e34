//! clawlined - The clawline background service
//!
//! This is the main entry point for the clawlined service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization and boot recovery
//! - Scheduler service, heartbeat
//! - Actuator (pulse helper or log-only)
//! - NDJSON command bridge on stdin/stdout

use anyhow::{Context, Result};
use clap::Parser;
use clawline_api::{
    API_VERSION, Command, ErrorCode, ErrorInfo, Event, HealthStatus, Request, Response,
    ResponsePayload,
};
use clawline_config::{Settings, load_config_or_default};
use clawline_core::{Payment, SchedulerError, SchedulerHandle, recover, spawn_heartbeat};
use clawline_host_api::{Actuator, ChannelBroadcaster, LogActuator};
use clawline_host_linux::{CommandActuator, DEFAULT_HELPER_TIMEOUT, HelperOptions, PulseTemplate};
use clawline_store::{AuditEvent, AuditEventType, QueueStore, SqliteStore};
use clawline_util::default_config_path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long queued pulses (the final release included) get to drain on exit
const HELPER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// clawlined - Queue and credit scheduler for a shared claw machine
#[derive(Parser, Debug)]
#[command(name = "clawlined")]
#[command(about = "Queue and credit scheduler for a shared claw machine", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/clawline/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CLAWLINE_DATA_DIR env var)
    #[arg(short, long, env = "CLAWLINE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// What a command needs to be answered
#[derive(Clone)]
struct Bridge {
    handle: SchedulerHandle,
    store: Arc<dyn QueueStore>,
    actuator: Arc<dyn Actuator>,
}

/// Main service state
struct Service {
    settings: Settings,
    store: Arc<dyn QueueStore>,
    actuator: Arc<dyn Actuator>,
    helper_worker: Option<JoinHandle<()>>,
    broadcaster: Arc<ChannelBroadcaster>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            first_move = ?settings.timing.first_move_window,
            credit = ?settings.timing.credit_window,
            max_per_payment = settings.credits.max_per_payment,
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.service.data_dir.clone());

        // Create data directory
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join("clawline.db");
        let store: Arc<dyn QueueStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        // Log service start
        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        // Initialize actuator
        let (actuator, helper_worker) = match &settings.actuator.command {
            Some(argv) => {
                let template = PulseTemplate::new(argv.clone())
                    .context("Invalid actuator command")?;
                let options = HelperOptions {
                    release_channel: settings.actuator.release_channel,
                    release_pulse: settings.actuator.pulse,
                    timeout: DEFAULT_HELPER_TIMEOUT,
                };
                let (actuator, worker) = CommandActuator::spawn(template, options);
                (Arc::new(actuator) as Arc<dyn Actuator>, Some(worker))
            }
            None => {
                warn!("No actuator command configured, pulses will only be logged");
                (Arc::new(LogActuator) as Arc<dyn Actuator>, None)
            }
        };

        Ok(Self {
            settings,
            store,
            actuator,
            helper_worker,
            broadcaster: Arc::new(ChannelBroadcaster::default()),
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            settings,
            store,
            actuator,
            helper_worker,
            broadcaster,
        } = self;

        // Reconcile whatever the previous process left behind
        let (recovered, report) = recover(store.as_ref()).context("Boot recovery failed")?;
        if !report.demoted.is_empty() || !report.swept.is_empty() {
            info!(demoted = ?report.demoted, swept = ?report.swept, "Recovered previous state");
        }

        // Single stdout writer shared by responses and events
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_lines(out_rx));
        let forwarder = tokio::spawn(forward_events(broadcaster.subscribe(), out_tx.clone()));

        let (handle, scheduler_task) = SchedulerHandle::spawn(
            recovered,
            &settings,
            store.clone(),
            actuator.clone(),
            broadcaster.clone(),
        );
        let heartbeat = spawn_heartbeat(
            handle.clone(),
            broadcaster.clone(),
            settings.service.heartbeat,
        );

        // Commands are served off the signal path, one line at a time
        let bridge = Bridge {
            handle: handle.clone(),
            store: store.clone(),
            actuator: actuator.clone(),
        };
        let commands = tokio::spawn(serve_commands(
            BufReader::new(tokio::io::stdin()).lines(),
            bridge,
            out_tx.clone(),
        ));

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;

        info!("Service running");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully");
            }
        }

        // Graceful shutdown
        info!("Shutting down clawlined");

        commands.abort();
        let _ = commands.await;
        heartbeat.abort();
        let _ = heartbeat.await;

        if let Err(e) = handle.shutdown().await {
            warn!(error = %e, "Scheduler did not shut down cleanly");
        }
        let _ = scheduler_task.await;

        // Log shutdown
        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        // Closing the broadcaster lets the forwarder flush the final events
        drop(broadcaster);
        drop(out_tx);
        let _ = forwarder.await;
        let _ = writer.await;

        // Let the helper worker run the release pulse before exit
        drop(actuator);
        if let Some(worker) = helper_worker
            && tokio::time::timeout(HELPER_DRAIN_TIMEOUT, worker).await.is_err()
        {
            warn!("Pulse helper queue did not drain before exit");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Answer request lines until input closes.
///
/// Stdin EOF does not stop the service; only a signal does.
async fn serve_commands<R: AsyncBufRead + Unpin>(
    mut lines: Lines<R>,
    bridge: Bridge,
    out: mpsc::UnboundedSender<String>,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&bridge, &line).await;
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        if out.send(json).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize response"),
                }
            }
            Ok(None) => {
                info!("Command input closed, running until signalled");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read command input");
                break;
            }
        }
    }
}

/// Parse one request line and run it
async fn handle_line(bridge: &Bridge, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Malformed request");
            return Response::error(
                0,
                ErrorInfo::new(ErrorCode::InvalidRequest, format!("Malformed request: {}", e)),
            );
        }
    };

    if request.api_version != API_VERSION {
        return Response::error(
            request.request_id,
            ErrorInfo::new(
                ErrorCode::InvalidRequest,
                format!("Unsupported API version {}", request.api_version),
            ),
        );
    }

    handle_command(bridge, request.request_id, request.command).await
}

async fn handle_command(bridge: &Bridge, request_id: u64, command: Command) -> Response {
    let handle = &bridge.handle;
    let result = match command {
        Command::Register {
            participant_id,
            display_name,
        } => handle
            .register(participant_id, display_name)
            .await
            .map(|newly_registered| ResponsePayload::Registered { newly_registered }),

        Command::PaymentConfirmed {
            participant_id,
            display_name,
            amount,
        } => {
            if !amount.is_finite() || amount <= 0.0 {
                return Response::error(
                    request_id,
                    ErrorInfo::new(ErrorCode::InvalidRequest, "Amount must be positive"),
                );
            }
            handle
                .payment_confirmed(participant_id, display_name, Payment::Amount(amount))
                .await
                .map(|outcome| ResponsePayload::PaymentAccepted {
                    credits_granted: outcome.credits_granted,
                    newly_confirmed: outcome.newly_confirmed,
                })
        }

        Command::Control {
            participant_id,
            action,
        } => handle
            .control(participant_id, action)
            .await
            .map(ResponsePayload::Control),

        Command::ForceEnd { reason } => handle
            .force_end(reason)
            .await
            .map(|_| ResponsePayload::Ended),

        Command::ForceStartNext => handle
            .force_start_next()
            .await
            .map(|participant_id| ResponsePayload::Activated { participant_id }),

        Command::ForceActivate { participant_id } => handle
            .force_activate(participant_id.clone())
            .await
            .map(|()| ResponsePayload::Activated {
                participant_id: Some(participant_id),
            }),

        Command::RequeueActive => handle
            .requeue_active()
            .await
            .map(|_| ResponsePayload::Requeued),

        Command::GetSnapshot => handle.snapshot().await.map(ResponsePayload::Snapshot),

        Command::GetHealth => Ok(ResponsePayload::Health(HealthStatus {
            store_ok: bridge.store.is_healthy(),
            actuator_ok: bridge.actuator.is_healthy(),
        })),

        Command::Ping => Ok(ResponsePayload::Pong),
    };

    match result {
        Ok(payload) => Response::success(request_id, payload),
        Err(e) => error_response(request_id, &e),
    }
}

fn error_response(request_id: u64, error: &SchedulerError) -> Response {
    Response::error(request_id, ErrorInfo::new(error.code(), error.to_string()))
}

/// Serialize every broadcast event onto the output stream
async fn forward_events(mut events: broadcast::Receiver<Event>, out: mpsc::UnboundedSender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    if out.send(json).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(event = event.name(), error = %e, "Failed to serialize event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event output lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_lines(mut lines: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to write to stdout");
            break;
        }
        let _ = stdout.flush().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for the NDJSON stream
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "clawlined starting"
    );

    // Create and run the service
    let service = Service::new(&args).await?;
    service.run().await
}
