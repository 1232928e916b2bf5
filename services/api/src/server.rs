use crate::cli::ServeArgs;
use crate::infra::{build_service, seed_demo_campus, AppState, CampusService};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use sirha::bootstrap::{ensure_admin, BootstrapOutcome, InMemoryUserDirectory};
use sirha::config::AppConfig;
use sirha::error::AppError;
use sirha::telemetry;
use sirha::workflows::change_requests::{
    InMemoryCampus, RequestPolicy, RequestServiceError, SystemClock,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let directory = InMemoryUserDirectory::default();
    match ensure_admin(&directory, &config.admin)? {
        BootstrapOutcome::Created(account) => info!(email = %account.email, "admin bootstrap"),
        BootstrapOutcome::AlreadyPresent(account) => {
            info!(email = %account.email, "admin already present")
        }
        BootstrapOutcome::Skipped => info!("admin bootstrap skipped; SIRHA_ADMIN_EMAIL unset"),
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let campus = Arc::new(InMemoryCampus::default());
    if args.seed_demo {
        seed_demo_campus(&campus, Utc::now()).map_err(RequestServiceError::from)?;
        info!("demo catalog loaded");
    }
    let policy = RequestPolicy::from(&config.requests);
    let (service, _notifier) = build_service(campus, policy, Arc::new(SystemClock));

    if args.sweep_interval_secs > 0 {
        spawn_expiry_sweep(service.clone(), Duration::from_secs(args.sweep_interval_secs));
    }

    let app = with_service_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "schedule-change request service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_expiry_sweep(service: Arc<CampusService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match service.sweep_expired() {
                Ok(0) => {}
                Ok(expired) => info!(expired, "expiry sweep finished"),
                Err(err) => warn!(error = %err, "expiry sweep failed"),
            }
        }
    });
}
