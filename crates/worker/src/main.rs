use std::time::Duration;

use anyhow::bail;
use tracing::{info, warn};

use rukun_domain::inbox::InboxState;
use rukun_infra::config::AppConfig;
use rukun_infra::logging::init_tracing;
use rukun_infra::memory::{MemoryBackend, build_engine};

mod observability;

fn log_snapshot(state: &InboxState) {
    match &state.view {
        Some(view) => info!(
            generation = state.generation,
            available = state.available,
            entries = view.entries.len(),
            total_unread = view.total_unread,
            "inbox snapshot committed"
        ),
        None => info!(
            generation = state.generation,
            available = state.available,
            "inbox snapshot committed without a view"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    if config.data_backend != "memory" {
        bail!("unsupported data backend: {}", config.data_backend);
    }

    let backend = MemoryBackend::new(config.push_buffer);
    let engine = build_engine(&backend, Duration::from_millis(config.notify_debounce_ms));
    let user_id = config.session_user_id.clone();

    let mut snapshots = engine.refresher.subscribe();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let state = snapshots.borrow_and_update().clone();
            log_snapshot(&state);
        }
    });

    let notifier = engine.notifier.clone();
    let notifier_user = user_id.clone();
    let notifier_task = tokio::spawn(async move {
        if let Err(err) = notifier.run(&notifier_user).await {
            warn!(error = %err, "change notifier stopped with an error");
        }
    });

    engine.refresher.refresh(&user_id).await?;
    info!(user_id = %user_id, "inbox worker running");

    let _ = tokio::signal::ctrl_c().await;
    engine.refresher.invalidate();
    notifier_task.abort();
    if let Some(scrape) = observability::render_metrics() {
        info!(metrics = %scrape, "final metrics scrape");
    }
    info!("inbox worker shutdown");

    Ok(())
}
