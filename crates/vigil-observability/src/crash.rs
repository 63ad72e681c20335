//! Crash handling and coordinated shutdown
//!
//! The supervisor owns the exit path: panics and termination signals
//! funnel into one shutdown sequence that flushes telemetry within a
//! bounded window and runs at most once. Background task failures are
//! reported but never terminate the process.

use crate::process::ProcessHealth;
use crate::telemetry::{Properties, Severity, TelemetryClient};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Upper bound on the telemetry drain during shutdown. The process
/// exits when the window closes even if data is still buffered.
pub const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates the process exit path: one bounded telemetry flush,
/// guaranteed to run at most once no matter how many triggers fire.
pub struct CrashSupervisor {
    client: Arc<TelemetryClient>,
    tracer_provider: Option<SdkTracerProvider>,
    shutting_down: AtomicBool,
    flush_timeout: Duration,
}

impl CrashSupervisor {
    pub fn new(
        client: Arc<TelemetryClient>,
        tracer_provider: Option<SdkTracerProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            tracer_provider,
            shutting_down: AtomicBool::new(false),
            flush_timeout: SHUTDOWN_FLUSH_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_flush_timeout(
        client: Arc<TelemetryClient>,
        flush_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            tracer_provider: None,
            shutting_down: AtomicBool::new(false),
            flush_timeout,
        })
    }

    /// Whether shutdown has already been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Run the shutdown sequence: flush telemetry within the bounded
    /// window, then shut down the tracer provider. Re-entrant calls
    /// return immediately; only the first trigger drains.
    pub async fn shutdown(&self, reason: &str) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!(reason, "Shutdown already in progress, ignoring trigger");
            return;
        }
        info!(reason, "Shutting down, flushing telemetry");

        let mut properties = Properties::new();
        properties.insert("reason".to_string(), reason.to_string());
        self.client
            .track_event("ApplicationShutdown", properties, None);

        if tokio::time::timeout(self.flush_timeout, self.client.flush())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.flush_timeout.as_secs(),
                "Telemetry flush did not complete within the shutdown window"
            );
        }

        if let Some(provider) = &self.tracer_provider {
            if let Err(shutdown_error) = provider.shutdown() {
                warn!(error = %shutdown_error, "Tracer provider shutdown failed");
            }
        }

        info!(reason, "Shutdown complete");
    }

    /// Record a panic as a fatal exception, drain telemetry, and
    /// terminate the process with a nonzero exit code. Never returns.
    pub async fn handle_panic(&self, message: &str, location: Option<&str>) {
        let mut properties = Properties::new();
        properties.insert("crashType".to_string(), "panic".to_string());
        if let Some(location) = location {
            properties.insert("location".to_string(), location.to_string());
        }
        self.client
            .track_exception(message, location, properties.clone());
        self.client
            .track_event("ProcessCrash", properties.clone(), None);
        self.client.track_trace(
            &format!("Fatal panic: {}", message),
            Severity::Critical,
            properties,
        );
        error!(
            severity = "fatal",
            message, location, "Panic, terminating after telemetry flush"
        );

        self.shutdown("panic").await;
        std::process::exit(1);
    }

    /// Report a failed background task. Unlike panics, task failures
    /// never terminate the process; they are tracked and logged so the
    /// rest of the system keeps running.
    pub fn report_task_failure(&self, task_name: &str, failure: &dyn std::fmt::Display) {
        let message = failure.to_string();
        let mut properties = Properties::new();
        properties.insert("crashType".to_string(), "task-failure".to_string());
        properties.insert("taskName".to_string(), task_name.to_string());
        self.client
            .track_exception(&message, None, properties.clone());
        self.client
            .track_event("BackgroundTaskFailure", properties, None);
        error!(task = task_name, error = %message, "Background task failed");
    }
}

tokio::task_local! {
    /// Marks tasks whose panics are caught and reported by
    /// [`spawn_supervised`] rather than the fatal hook path.
    static SUPERVISED_TASK: ();
}

fn in_supervised_task() -> bool {
    SUPERVISED_TASK.try_with(|_| ()).is_ok()
}

/// Install a panic hook that routes panics through the supervisor's
/// fatal path. The hook runs on the panicking thread, so the async
/// flush is dispatched onto the runtime and awaited with a bounded
/// blocking wait before the process exits.
///
/// Panics inside a [`spawn_supervised`] task are excluded: the hook
/// lets them unwind into a `JoinError`, where the supervisor reports
/// them without terminating the process.
pub fn install_panic_hook(supervisor: Arc<CrashSupervisor>) {
    let runtime = tokio::runtime::Handle::current();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        previous(panic_info);

        if in_supervised_task() {
            return;
        }

        let message = panic_payload_message(panic_info.payload());
        let location = panic_info.location().map(|l| l.to_string());
        let supervisor = supervisor.clone();

        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        runtime.spawn(async move {
            let _guard = done_tx;
            supervisor
                .handle_panic(&message, location.as_deref())
                .await;
        });
        // handle_panic exits the process; the recv only returns if the
        // runtime is torn down first, and the timeout caps the wait
        // when the flush stalls.
        let _ = done_rx.recv_timeout(SHUTDOWN_FLUSH_TIMEOUT + Duration::from_secs(5));
        std::process::exit(1);
    }));
    info!("Panic hook installed");
}

fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Spawn a background task whose failure is reported through the
/// supervisor instead of being silently dropped. Failure means either
/// an `Err` result or a panic inside the task; neither terminates the
/// process.
pub fn spawn_supervised<F, E>(
    supervisor: Arc<CrashSupervisor>,
    task_name: &str,
    task: F,
) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = task_name.to_string();
    tokio::spawn(async move {
        let outcome = tokio::spawn(SUPERVISED_TASK.scope((), task)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(task_error)) => {
                supervisor.report_task_failure(&task_name, &task_error);
            }
            Err(join_error) => {
                supervisor.report_task_failure(&task_name, &join_error);
            }
        }
    })
}

/// Periodically sample process memory and warn past the threshold.
/// Samples feed the telemetry client as metrics.
pub fn start_memory_monitor(
    supervisor: Arc<CrashSupervisor>,
    interval: Duration,
    warn_threshold_mb: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if supervisor.is_shutting_down() {
                break;
            }
            let health = ProcessHealth::snapshot();
            tracing::debug!(
                rss_mb = health.memory.rss_mb,
                peak_rss_mb = health.memory.peak_rss_mb,
                "Memory sampled"
            );
            if health.memory.rss_mb > warn_threshold_mb {
                let mut properties = Properties::new();
                properties.insert("rssMb".to_string(), health.memory.rss_mb.to_string());
                properties.insert(
                    "thresholdMb".to_string(),
                    warn_threshold_mb.to_string(),
                );
                supervisor
                    .client
                    .track_event("HighMemoryUsage", properties, None);
                warn!(
                    rss_mb = health.memory.rss_mb,
                    threshold_mb = warn_threshold_mb,
                    "Memory usage above threshold"
                );
            }
        }
    })
}

/// Resolve when a termination signal arrives (SIGTERM or SIGINT on
/// unix, ctrl-c elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(signal_error) => {
                error!(error = %signal_error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
                unreachable!()
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                if let Err(signal_error) = result {
                    error!(error = %signal_error, "Failed to listen for ctrl-c");
                }
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(signal_error) = tokio::signal::ctrl_c().await {
            error!(error = %signal_error, "Failed to listen for ctrl-c");
        }
        info!("Received ctrl-c");
    }
}
