use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{BatchListener, BatchOptions, BatchSummary, ExecutionResult, LogStore, ProgressStatus};
use crate::device::{Credentials, Device};
use crate::error::PlinkError;
use crate::session::{LineCallback, SessionAutomator, SessionOptions, ShellTransport};

/// Immutable inputs of one batch.
struct BatchPlan {
    devices: Vec<Device>,
    commands: Vec<String>,
    credentials: Credentials,
    options: BatchOptions,
}

/// Mutable state of the current (or last) batch. Only touched under its lock.
#[derive(Default)]
struct BatchState {
    plan: Option<Arc<BatchPlan>>,
    running: bool,
    cancelled: bool,
    success_count: usize,
    fail_count: usize,
    completed_count: usize,
    results: Vec<ExecutionResult>,
}

impl BatchState {
    fn total(&self) -> usize {
        self.plan.as_ref().map(|plan| plan.devices.len()).unwrap_or(0)
    }

    fn summary(&self) -> BatchSummary {
        BatchSummary {
            success: self.success_count,
            failed: self.fail_count,
            total: self.total(),
            cancelled: self.cancelled,
        }
    }
}

/// Shared between the orchestrator handle and the batch task.
struct Shared<T> {
    transport: Arc<T>,
    log_store: Arc<dyn LogStore>,
    state: Mutex<BatchState>,
    cancel: Mutex<CancellationToken>,
    idle: Notify,
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs one command set across a device set, one batch at a time.
///
/// The batch executes on a background task; [`start`](Self::start) returns
/// immediately. Counters and results are updated under a single lock that
/// is never held across network I/O, so [`summary`](Self::summary) and
/// [`results`](Self::results) are safe to call while the batch runs.
pub struct Orchestrator<T: ShellTransport + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: ShellTransport + 'static> Clone for Orchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: ShellTransport + 'static> Orchestrator<T> {
    pub fn new(transport: T, log_store: Arc<dyn LogStore>) -> Self {
        Self::with_shared_transport(Arc::new(transport), log_store)
    }

    pub fn with_shared_transport(transport: Arc<T>, log_store: Arc<dyn LogStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                log_store,
                state: Mutex::new(BatchState::default()),
                cancel: Mutex::new(CancellationToken::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Starts a batch in the background.
    ///
    /// Fails without side effects when a batch is already running, when the
    /// device or command list is empty, when the batch credentials are
    /// incomplete, or when enable mode is requested and some device has no
    /// privileged password. Blank commands are dropped before the check.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        devices: Vec<Device>,
        commands: Vec<String>,
        credentials: Credentials,
        options: BatchOptions,
        listener: Arc<dyn BatchListener>,
    ) -> Result<(), PlinkError> {
        let commands: Vec<String> = commands
            .into_iter()
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty())
            .collect();
        validate(&devices, &commands, &credentials, &options)?;

        let plan = Arc::new(BatchPlan {
            devices,
            commands,
            credentials,
            options,
        });
        let token = CancellationToken::new();
        {
            let mut state = self.shared.state();
            if state.running {
                return Err(PlinkError::AlreadyRunning);
            }
            *state = BatchState {
                plan: Some(plan.clone()),
                running: true,
                results: Vec::with_capacity(plan.devices.len()),
                ..BatchState::default()
            };
            *self.shared.cancel_token() = token.clone();
        }

        info!(
            "Batch started: {} devices, {} commands, pool size {}",
            plan.devices.len(),
            plan.commands.len(),
            plan.options.pool_size.max(1)
        );
        tokio::spawn(run_batch(self.shared.clone(), plan, listener, token));
        Ok(())
    }

    /// Requests cooperative cancellation. Devices already in progress finish normally.
    pub fn stop(&self) {
        debug!("Batch stop requested");
        self.shared.cancel_token().cancel();
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().running
    }

    /// Success, failure and total counts of the current or last batch.
    pub fn summary(&self) -> BatchSummary {
        self.shared.state().summary()
    }

    /// Snapshot of the results produced so far, in completion order.
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.shared.state().results.clone()
    }

    /// Resolves once no batch is running.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

fn validate(
    devices: &[Device],
    commands: &[String],
    credentials: &Credentials,
    options: &BatchOptions,
) -> Result<(), PlinkError> {
    if devices.is_empty() {
        return Err(PlinkError::Validation("No servers loaded".to_string()));
    }
    if commands.is_empty() {
        return Err(PlinkError::Validation("No commands loaded".to_string()));
    }
    if !credentials.is_complete() {
        return Err(PlinkError::Validation(
            "Username and password are required".to_string(),
        ));
    }
    if options.enable_mode {
        for device in devices {
            device
                .effective_credentials(credentials)
                .require_privileged_password(device)?;
        }
    }
    Ok(())
}

async fn run_batch<T: ShellTransport + 'static>(
    shared: Arc<Shared<T>>,
    plan: Arc<BatchPlan>,
    listener: Arc<dyn BatchListener>,
    token: CancellationToken,
) {
    let queue = Arc::new(Mutex::new(plan.devices.iter().cloned().collect::<VecDeque<_>>()));
    let pool_size = plan.options.pool_size.max(1).min(plan.devices.len());

    let mut workers = JoinSet::new();
    for worker_id in 0..pool_size {
        workers.spawn(worker(
            worker_id,
            shared.clone(),
            plan.clone(),
            queue.clone(),
            listener.clone(),
            token.clone(),
        ));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!("Batch worker ended abnormally: {}", e);
        }
    }

    let summary = {
        let mut state = shared.state();
        state.running = false;
        state.cancelled = token.is_cancelled() && state.completed_count < state.total();
        state.summary()
    };
    info!(
        "Batch finished: {} succeeded, {} failed, {} total{}",
        summary.success,
        summary.failed,
        summary.total,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    listener.on_complete(&summary);
    shared.idle.notify_waiters();
}

async fn worker<T: ShellTransport + 'static>(
    worker_id: usize,
    shared: Arc<Shared<T>>,
    plan: Arc<BatchPlan>,
    queue: Arc<Mutex<VecDeque<Device>>>,
    listener: Arc<dyn BatchListener>,
    token: CancellationToken,
) {
    let total = plan.devices.len();
    let session_options = plan.options.session_options();

    loop {
        if token.is_cancelled() {
            debug!("Worker {} stopping: batch cancelled", worker_id);
            break;
        }
        let next = queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        let Some(device) = next else {
            break;
        };

        let current = shared.state().completed_count + 1;
        listener.on_progress(current, total, &device, ProgressStatus::Connecting);

        let result = execute_device(&shared, &plan, &device, &session_options, &listener).await;
        let status = if result.success {
            ProgressStatus::Success
        } else {
            ProgressStatus::Failed
        };

        let completed = {
            let mut state = shared.state();
            if result.success {
                state.success_count += 1;
            } else {
                state.fail_count += 1;
            }
            state.completed_count += 1;
            state.results.push(result.clone());
            state.completed_count
        };

        listener.on_result(&result);
        listener.on_progress(completed, total, &device, status);
    }
}

async fn execute_device<T: ShellTransport + 'static>(
    shared: &Shared<T>,
    plan: &BatchPlan,
    device: &Device,
    session_options: &SessionOptions,
    listener: &Arc<dyn BatchListener>,
) -> ExecutionResult {
    let started = Instant::now();
    let credentials = device.effective_credentials(&plan.credentials);

    let line_listener = listener.clone();
    let address = device.address.clone();
    let display_name = device.display_name().to_string();
    let on_line: LineCallback =
        Arc::new(move |line: &str| line_listener.on_line(&address, &display_name, line));

    let outcome = SessionAutomator::new(session_options.clone())
        .with_line_callback(on_line)
        .run(shared.transport.as_ref(), device, credentials, &plan.commands)
        .await;

    let (success, transcript, error, log_artifact_key) = match outcome {
        Ok(transcript) => {
            let group = plan.options.schedule_name.clone();
            match persist(shared.log_store.clone(), group, device.display_name(), &transcript).await {
                Ok(key) => (true, transcript, None, Some(key)),
                Err(err) => (false, transcript, Some(err.to_string()), None),
            }
        }
        Err(err) => (false, String::new(), Some(err.to_string()), None),
    };

    if let Some(err) = error.as_ref() {
        warn!("{} ({}) failed: {}", device.address, device.display_name(), err);
    } else {
        debug!("{} ({}) succeeded", device.address, device.display_name());
    }

    ExecutionResult {
        device: device.clone(),
        success,
        transcript,
        error,
        log_artifact_key,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn persist(
    store: Arc<dyn LogStore>,
    group: Option<String>,
    key: &str,
    content: &str,
) -> Result<String, PlinkError> {
    let key = key.to_string();
    let content = content.to_string();
    tokio::task::spawn_blocking(move || store.write(group.as_deref(), &key, &content))
        .await
        .map_err(|e| PlinkError::LogPersist(format!("log writer task failed: {e}")))?
}
