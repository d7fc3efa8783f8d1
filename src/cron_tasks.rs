use crate::Config;
use crate::config::MaintenanceConfig;
use crate::error::app_error::AppError;
use crate::models::maintenance::CleanupReport;
use crate::service::security::SecurityService;
use crate::service::session::SessionService;
use crate::{AppServices, connect_services};
use rocket::fairing::AdHoc;
use std::time::Duration;
use tracing::{error, info};

/// One reconciliation sweep: dangling session ids, expired lockouts and
/// activities past retention. Each step runs even if an earlier one failed.
pub async fn run_maintenance(sessions: &SessionService, security: &SecurityService) -> Result<CleanupReport, AppError> {
    let mut first_error: Option<AppError> = None;
    let mut report = CleanupReport::default();

    match sessions.cleanup_expired_sessions().await {
        Ok(cleaned) => report.dangling_session_ids = cleaned,
        Err(e) => {
            error!(error = %e, "session reconciliation failed");
            first_error.get_or_insert(e);
        }
    }
    match security.cleanup_expired_lockouts().await {
        Ok(removed) => report.expired_lockouts = removed,
        Err(e) => {
            error!(error = %e, "expired lockout cleanup failed");
            first_error.get_or_insert(e);
        }
    }
    match security.cleanup_stale_activities().await {
        Ok(removed) => report.stale_activities = removed,
        Err(e) => {
            error!(error = %e, "stale activity cleanup failed");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(
                dangling_session_ids = report.dangling_session_ids,
                expired_lockouts = report.expired_lockouts,
                stale_activities = report.stale_activities,
                "maintenance sweep finished"
            );
            Ok(report)
        }
    }
}

/// Runs the sweep on a fixed interval for as long as the server is up.
pub fn stage_maintenance(config: MaintenanceConfig) -> AdHoc {
    AdHoc::on_liftoff("Maintenance", move |rocket| {
        Box::pin(async move {
            if !config.enabled {
                info!("periodic maintenance disabled");
                return;
            }

            let (Some(sessions), Some(security)) = (rocket.state::<SessionService>(), rocket.state::<SecurityService>()) else {
                error!("maintenance services are not managed, periodic sweep not started");
                return;
            };
            let (sessions, security) = (sessions.clone(), security.clone());
            let period = Duration::from_secs(config.interval_seconds.max(1));

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let _ = run_maintenance(&sessions, &security).await;
                }
            });
            info!(interval_secs = period.as_secs(), "periodic maintenance scheduled");
        })
    })
}

/// Entry point for the `cron` binary: connect, sweep once, disconnect.
pub async fn run_cleanup(config: &Config) -> Result<CleanupReport, AppError> {
    let AppServices { sessions, security, .. } = connect_services(config).await?;
    run_maintenance(&sessions, &security).await
}
