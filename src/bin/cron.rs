use tracing_subscriber::EnvFilter;
use whoami_auth::{AppError, CleanupReport, Config, run_cleanup};

fn print_usage(bin_name: &str) {
    eprintln!("Usage: {bin_name} cleanup");
}

fn init_tracing(log_level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    if json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn cleanup() -> Result<CleanupReport, AppError> {
    let config = Config::load()?;
    init_tracing(&config.logging.level, config.logging.json_format);
    run_cleanup(&config).await
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let mut args = std::env::args();
    let bin_name = args.next().unwrap_or_else(|| "cron".to_string());
    let command = args.next();

    if command.as_deref() != Some("cleanup") || args.next().is_some() {
        print_usage(&bin_name);
        std::process::exit(2);
    }

    match cleanup().await {
        Ok(report) => {
            println!(
                "Maintenance sweep completed: dangling_session_ids={}, expired_lockouts={}, stale_activities={}",
                report.dangling_session_ids, report.expired_lockouts, report.stale_activities
            );
        }
        Err(err) => {
            eprintln!("Cron job failed: {err:?}");
            std::process::exit(1);
        }
    }
}
