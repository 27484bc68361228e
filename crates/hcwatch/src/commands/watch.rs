//! `hcwatch watch`: run the supervised watcher into the configured sinks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use hcwatch_core::{
    CounterMetrics, Exporter, FileExporter, Metrics, MultiExporter, SqlExporter, Supervisor,
    WatcherHealth,
};

use crate::cli::WatchArgs;
use crate::error::CliError;

use super::ActiveProfile;

pub async fn handle(args: WatchArgs, profile: &ActiveProfile) -> Result<(), CliError> {
    let (client, mut watcher) = profile.runtime()?;
    if args.appliance.is_some() {
        watcher.appliance = args.appliance;
    }

    let sinks = build_sinks(
        args.output_dir.or_else(|| profile.profile.output_dir.clone()),
        args.database.or_else(|| profile.profile.database.clone()),
        profile,
    )
    .await?;

    let metrics = Arc::new(CounterMetrics::new());
    let factory = client.transport_factory(Arc::clone(&metrics) as Arc<dyn Metrics>);
    let supervisor = Supervisor::new(factory, watcher, Arc::new(sinks))
        .with_metrics(Arc::clone(&metrics) as Arc<dyn Metrics>);

    supervisor
        .start()
        .await
        .map_err(|e| CliError::from_core(e, &profile.name))?;
    info!(profile = %profile.name, "watching for appliance events");

    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    status.tick().await;

    let finished = supervisor.wait();
    tokio::pin!(finished);

    let outcome = loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("interrupted, shutting down");
                break None;
            }
            health = &mut finished => break Some(health),
            _ = status.tick() => log_status(&metrics, &supervisor.health().await),
        }
    };

    supervisor.shutdown().await?;

    match outcome {
        None => Ok(()),
        Some(WatcherHealth::Unauthorized) => Err(CliError::AuthExpired {
            profile: profile.name.clone(),
            message: "the API rejected the stored token".into(),
        }),
        Some(WatcherHealth::Failed(message)) => Err(CliError::WatcherFailed { message }),
        Some(other) => Err(CliError::WatcherFailed {
            message: format!("watcher ended unexpectedly ({other:?})"),
        }),
    }
}

async fn build_sinks(
    output_dir: Option<std::path::PathBuf>,
    database: Option<String>,
    profile: &ActiveProfile,
) -> Result<MultiExporter, CliError> {
    let mut sinks = MultiExporter::new(Vec::new());

    if let Some(dir) = output_dir {
        let flush = profile.profile.flush_interval(&profile.defaults);
        info!(dir = %dir.display(), flush_secs = flush.as_secs(), "recording to JSONL files");
        sinks.push(Arc::new(FileExporter::new(dir, flush)) as Arc<dyn Exporter>);
    }
    if let Some(url) = database {
        info!(database = %url, "recording to SQLite");
        sinks.push(Arc::new(SqlExporter::connect(&url).await?) as Arc<dyn Exporter>);
    }

    if sinks.is_empty() {
        return Err(CliError::Validation {
            field: "output".into(),
            reason: "no sink configured; set output_dir or database in the profile, \
                     or pass --output-dir / --database"
                .into(),
        });
    }
    Ok(sinks)
}

fn log_status(metrics: &CounterMetrics, health: &WatcherHealth) {
    let snapshot = metrics.snapshot();
    let mut disconnects: Vec<String> = snapshot
        .disconnects
        .iter()
        .map(|(reason, count)| format!("{reason}={count}"))
        .collect();
    disconnects.sort();
    let last_event = snapshot.last_event_age.map_or_else(
        || "never".to_owned(),
        |age| humantime::format_duration(Duration::from_secs(age.as_secs())).to_string(),
    );

    if health.is_healthy() {
        info!(
            events = snapshot.events,
            appliances = snapshot.appliances,
            token_refreshes = snapshot.token_refreshes,
            disconnects = %disconnects.join(" "),
            %last_event,
            "watcher status"
        );
    } else {
        warn!(
            ?health,
            events = snapshot.events,
            disconnects = %disconnects.join(" "),
            %last_event,
            "watcher unhealthy"
        );
    }
}
