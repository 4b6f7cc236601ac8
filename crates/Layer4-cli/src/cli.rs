//! Command implementations

use anyhow::{bail, Context};
use conduit_foundation::{
    open_task_store, ConduitConfig, ConfigLoader, EventBus, TaskEvent, TaskId, TaskRecord,
};
use conduit_sandbox::{DockerSandboxProvider, SandboxSpec};
use conduit_session::HttpSessionClient;
use conduit_task::{OrchestratorDeps, Phase, RunSettings, TaskRegistry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Grace period for the event printer to drain after the task ends
const PRINTER_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub instruction: String,
    pub user: String,
    pub image: Option<String>,
    pub timeout_secs: Option<u64>,
    pub print_events: bool,
}

/// Standard config layers, plus `extra` when given (must exist)
pub fn load_config(extra: Option<&Path>) -> anyhow::Result<ConduitConfig> {
    let mut loader = ConfigLoader::standard();
    if let Some(path) = extra {
        loader = loader.with_required(path)?;
    }
    Ok(loader.load()?)
}

pub fn run_settings(config: &ConduitConfig, options: &RunOptions) -> RunSettings {
    let mut settings = RunSettings::from_config(config);
    if let Some(image) = &options.image {
        settings = settings.with_image(image.as_str());
    }
    if let Some(secs) = options.timeout_secs {
        settings = settings.with_task_timeout(Duration::from_secs(secs));
    }
    settings
}

/// 0 for completed, 130 for cancelled, 1 for failed
pub fn exit_code(phase: &Phase) -> i32 {
    match phase {
        Phase::Completed => 0,
        Phase::Cancelled => 130,
        _ => 1,
    }
}

/// Create a task record and drive it to a terminal phase
pub async fn run_task(config: ConduitConfig, options: RunOptions) -> anyhow::Result<Phase> {
    let store = open_task_store(&config.storage)?;
    let record = TaskRecord::new(options.instruction.as_str(), options.user.as_str());
    let task_id = record.id;
    store.insert_task(record).await?;

    let provider = DockerSandboxProvider::connect(SandboxSpec::from_settings(&config.sandbox))?;
    if !provider.is_available().await {
        bail!("Docker is not reachable; is the daemon running?");
    }
    let sessions = HttpSessionClient::with_timeout(config.session.request_timeout())?;
    let events = Arc::new(EventBus::new());

    let deps = OrchestratorDeps {
        sandbox: Arc::new(provider),
        sessions: Arc::new(sessions),
        store: Arc::clone(&store),
        events: Arc::clone(&events),
    };
    let settings = run_settings(&config, &options);

    println!("Task {}", task_id);
    let rx = events.subscribe(task_id).await;
    let printer = tokio::spawn(print_events(rx, options.print_events));

    let registry = TaskRegistry::new();
    let handle = registry.start(task_id, deps, settings)?;

    let phase = tokio::select! {
        phase = handle.wait() => phase,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling task {}...", task_id.short());
            handle.cancel();
            handle.wait().await
        }
    };

    let _ = tokio::time::timeout(PRINTER_DRAIN, printer).await;

    match store.get_task(&task_id).await {
        Ok(record) => match &record.error {
            Some(error) => println!("Task {}: {} ({})", task_id.short(), record.status, error),
            None => println!("Task {}: {}", task_id.short(), record.status),
        },
        Err(e) => tracing::warn!("Could not read back task {}: {}", task_id, e),
    }

    Ok(phase)
}

async fn print_events(mut rx: broadcast::Receiver<TaskEvent>, raw: bool) {
    loop {
        match rx.recv().await {
            Ok(TaskEvent::StatusChanged { status, .. }) => println!("[status] {}", status),
            Ok(TaskEvent::Raw { event, .. }) => {
                if raw {
                    println!("{}", event);
                } else if let Some(event_type) = event.get("type").and_then(|t| t.as_str()) {
                    println!("[event] {}", event_type);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event printer lagged, skipped {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Print a stored task record as JSON
pub async fn show_task(config: &ConduitConfig, task_id: &str) -> anyhow::Result<()> {
    let id: TaskId = task_id.parse()?;
    let store = open_task_store(&config.storage)?;
    let record = store
        .get_task(&id)
        .await
        .with_context(|| format!("task {} not found", id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
