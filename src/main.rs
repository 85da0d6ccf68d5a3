use spimex_ingestion::{config::AppConfig, service::IngestionApp};
use tracing::{info, debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("spimex_ingestion=debug".parse()?)
            .add_directive("sqlx=warn".parse()?)
            .add_directive("reqwest=info".parse()?)
            .add_directive("hyper=info".parse()?))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting trading report ingestion");
    let config = AppConfig::load()?;
    debug!("Environment: DB_HOST={}, DB_NAME={}, SCRATCH_DIR={}",
        config.database.host,
        config.database.name,
        config.scratch_dir.display()
    );

    let app = IngestionApp::new(&config).await?;
    let started = std::time::Instant::now();

    let report = app.run_until(async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Could not listen for Ctrl-C; run will not be interruptible");
            std::future::pending::<()>().await;
        }
    }).await;

    info!("Ingestion finished in {:.1}s", started.elapsed().as_secs_f64());
    if std::env::var("REPORT_FORMAT").map(|f| f == "json").unwrap_or(false) {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(())
}
