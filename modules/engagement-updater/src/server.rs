//! Wires the trigger paths onto a process context and runs until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use updater_common::RoutingKey;

use crate::dispatch::Dispatcher;
use crate::jobs::BulkJobs;
use crate::lifecycle::ProcessContext;
use crate::metrics::Metrics;
use crate::planner::AssociationPlanner;
use crate::readiness::ReadinessAggregator;
use crate::routes::{self, AppState};
use crate::runner::BoundedRunner;
use crate::source::EngagementSource;
use crate::subscription::SubscriptionHandler;

/// Serve HTTP and consume notifications until interrupted, then drain.
pub async fn run(context: Arc<ProcessContext>) -> anyhow::Result<()> {
    let settings = context.settings.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let planner = AssociationPlanner::new(context.query.clone(), settings.association_type.clone());
    let dispatcher = Dispatcher::new(Arc::new(planner), context.command.clone());
    let source = EngagementSource::new(context.query.clone(), settings.bulk_page_size);
    let runner = BoundedRunner::new(settings.bulk_concurrency)?;

    let (jobs, jobs_worker) = BulkJobs::start(
        source.clone(),
        dispatcher.clone(),
        runner,
        settings.bulk_queue_capacity,
        settings.job_history,
        settings.shutdown_grace,
        shutdown_rx.clone(),
    );

    let handler = Arc::new(SubscriptionHandler::new(
        dispatcher.clone(),
        RoutingKey::ENGAGEMENT_BINDING,
        settings.retry_delay,
        shutdown_rx.clone(),
    ));
    let stream = context
        .bus
        .subscribe(handler.binding())
        .await
        .context("failed to subscribe to engagement notifications")?;
    let consumer = tokio::spawn(handler.consume(
        stream,
        usize::from(settings.amqp.prefetch_count),
        settings.shutdown_grace,
    ));

    let metrics = settings.expose_metrics.then(|| {
        info!("Exposing metrics on /metrics");
        Arc::new(Metrics::new(settings.commit_tag.clone(), settings.commit_sha.clone()))
    });

    let state = Arc::new(AppState {
        service_name: settings.service_name.clone(),
        dispatcher,
        source,
        jobs,
        readiness: ReadinessAggregator::for_dependencies(
            context.bus.clone(),
            context.query.clone(),
            context.command.clone(),
        ),
        metrics,
    });

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("{} listening on {addr}", settings.service_name);

    let served = axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer.await {
        error!(error = %e, "Notification consumer crashed");
    }
    // The worker bounds its own drain by the grace period.
    match tokio::time::timeout(settings.shutdown_grace + Duration::from_secs(5), jobs_worker).await {
        Ok(Err(e)) => error!(error = %e, "Bulk job worker crashed"),
        Err(_) => warn!("Bulk job worker did not stop in time"),
        Ok(Ok(())) => {}
    }

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
