use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use treewatch_core::WatchConfig;
use treewatch_sync::{pipeline, MirrorRoots, Transport};

use crate::audit::AuditLog;
use crate::debounce::{self, Debouncer};
use crate::error::{io_err, DaemonError};
use crate::event_source::EventSource;
use crate::executor::{run_worker, CountersSnapshot, Executor, RetryPolicy, SyncCounters};
use crate::log_rotation::{MAX_LOG_BYTES, MAX_ROTATED_FILES};
use crate::paths;
use crate::protocol::{ControlRequest, ControlResponse};
use crate::queue::{QueueStats, WorkQueue};
use crate::reconcile;
use crate::task::ChangeEvent;

const AUDIT_ROTATION_PERIOD: Duration = Duration::from_secs(30);

/// Everything a daemon run needs, resolved up front.
pub struct RunOptions {
    pub config: WatchConfig,
    pub transport: Arc<dyn Transport>,
    pub audit: AuditLog,
    /// Control socket to serve; `None` disables the control surface.
    pub socket: Option<PathBuf>,
    /// Install Ctrl-C / SIGTERM handlers.
    pub handle_signals: bool,
}

impl RunOptions {
    /// Options for the `treewatch watch` process rooted at `home`.
    pub fn for_home(config: WatchConfig, home: &Path) -> Result<Self, DaemonError> {
        let audit_path = config
            .audit_log
            .clone()
            .unwrap_or_else(|| paths::audit_log_path(home));
        Ok(Self {
            transport: pipeline::transport_for(&config),
            audit: AuditLog::open(&audit_path)?,
            socket: Some(paths::socket_path(home)),
            handle_signals: true,
            config,
        })
    }
}

/// What a daemon run did, reported once it has shut down.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub counters: CountersSnapshot,
    /// Tasks still queued at exit; the next startup sweep covers them.
    pub unsynced_at_shutdown: usize,
}

#[derive(Clone)]
struct ControlState {
    roots: MirrorRoots,
    queue: WorkQueue,
    counters: Arc<SyncCounters>,
    transport: &'static str,
    socket: PathBuf,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: WatchConfig, home: &Path) -> Result<RunSummary, DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async {
        let options = RunOptions::for_home(config, home)?;
        let (shutdown_tx, _) = broadcast::channel(16);
        run(options, shutdown_tx).await
    })
}

/// Validate, subscribe, then run the pipeline until `shutdown` fires.
pub async fn run(
    options: RunOptions,
    shutdown: broadcast::Sender<()>,
) -> Result<RunSummary, DaemonError> {
    options.config.validate()?;
    let roots = pipeline::prepare_roots(&options.config)?;
    let (source, events) = EventSource::subscribe(&roots.source, options.config.event_buffer)?;
    run_pipeline(options, roots, events, Some(source), shutdown).await
}

/// The pipeline proper, fed from any event receiver.
pub(crate) async fn run_pipeline(
    options: RunOptions,
    roots: MirrorRoots,
    events: mpsc::Receiver<ChangeEvent>,
    source: Option<EventSource>,
    shutdown: broadcast::Sender<()>,
) -> Result<RunSummary, DaemonError> {
    let RunOptions {
        config,
        transport,
        audit,
        socket,
        handle_signals,
    } = options;
    let mut shutdown_rx = shutdown.subscribe();

    let queue = WorkQueue::new();
    let counters = Arc::new(SyncCounters::default());
    reconcile::request_full_sweep(&queue, &roots.source);

    let transport_name = transport.name();
    let executor = Arc::new(Executor::new(
        roots.clone(),
        transport,
        audit.clone(),
        Arc::clone(&counters),
    ));
    let policy = RetryPolicy::from_config(&config);
    tracing::info!(
        source = %roots.source.display(),
        mirror = %roots.mirror.display(),
        transport = transport_name,
        workers = config.workers,
        "treewatch started",
    );

    let debounce_handle = tokio::spawn(debounce::run(
        events,
        Debouncer::new(config.debounce_window()),
        queue.clone(),
        audit.clone(),
    ));

    let workers: Vec<JoinHandle<()>> = (0..config.workers)
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                queue.clone(),
                Arc::clone(&executor),
                policy,
            ))
        })
        .collect();

    let reconcile_handle = tokio::spawn(reconcile::run(
        roots.source.clone(),
        config.reconcile_interval(),
        queue.clone(),
        shutdown.subscribe(),
    ));

    let rotation_handle = tokio::spawn(audit_rotation_task(audit.clone(), shutdown.subscribe()));

    let socket_handle = socket.map(|socket| {
        let state = ControlState {
            roots: roots.clone(),
            queue: queue.clone(),
            counters: Arc::clone(&counters),
            transport: transport_name,
            socket,
            started_at_unix: unix_seconds_now(),
        };
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    });

    let signal_handle = handle_signals.then(|| tokio::spawn(signal_task(shutdown.clone())));

    let _ = shutdown_rx.recv().await;
    tracing::info!("shutting down");

    queue.close();
    if let Some(source) = source {
        source.close();
    }

    let flushed = debounce_handle
        .await
        .map_err(|err| DaemonError::Protocol(format!("debouncer task join failure: {err}")))?;
    for worker in workers {
        worker
            .await
            .map_err(|err| DaemonError::Protocol(format!("worker task join failure: {err}")))?;
    }
    reconcile_handle
        .await
        .map_err(|err| DaemonError::Protocol(format!("reconcile task join failure: {err}")))?;
    handle_join("audit_rotation", rotation_handle.await)?;
    if let Some(handle) = socket_handle {
        handle_join("socket_server", handle.await)?;
    }
    if let Some(handle) = signal_handle {
        handle_join("signal_handler", handle.await)?;
    }

    let left = queue.stats();
    if left.queued > 0 {
        tracing::warn!(
            count = left.queued,
            flushed,
            "changes left unsynchronized; the next startup reconciliation covers them",
        );
    }
    Ok(RunSummary {
        counters: counters.snapshot(),
        unsynced_at_shutdown: left.queued,
    })
}

async fn socket_server_task(
    state: ControlState,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = state.socket.clone();
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_control_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "control client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_control_client(
    stream: UnixStream,
    state: ControlState,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("control socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &ControlResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => ControlResponse::ok(status_payload(&state)),
            "sync" => {
                reconcile::request_full_sweep(&state.queue, &state.roots.source);
                ControlResponse::ok(json!({ "queued": true }))
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                ControlResponse::ok(json!({ "stopping": true }))
            }
            other => ControlResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn status_payload(state: &ControlState) -> Value {
    let queue: QueueStats = state.queue.stats();
    json!({
        "running": true,
        "pid": std::process::id(),
        "source": state.roots.source.display().to_string(),
        "mirror": state.roots.mirror.display().to_string(),
        "transport": state.transport,
        "socket": state.socket.display().to_string(),
        "started_at_unix": state.started_at_unix,
        "queue": queue,
        "sync": state.counters.snapshot(),
    })
}

async fn audit_rotation_task(
    audit: AuditLog,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(AUDIT_ROTATION_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let audit = audit.clone();
                let rotated = tokio::task::spawn_blocking(move || {
                    audit.rotate_if_needed(MAX_LOG_BYTES, MAX_ROTATED_FILES)
                })
                .await;
                // Rotation trouble is reported but never stops the daemon.
                match rotated {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => tracing::warn!(error = %err, "audit log rotation failed"),
                    Err(err) => tracing::warn!(error = %err, "audit log rotation join failure"),
                }
            }
        }
    }
    Ok(())
}

async fn signal_task(shutdown: broadcast::Sender<()>) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut shutdown_rx = shutdown.subscribe();
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down");
            let _ = shutdown.send(());
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                tracing::info!("received ctrl-c, shutting down");
                let _ = shutdown.send(());
                Ok(())
            }
            Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
        },
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "control socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale control socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &ControlResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("control socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("control socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
