use std::sync::Arc;

use pglocker::locker::RunnerFn;
use pglocker::{db, Locker, LockerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Minimal locker daemon: claims jobs and, in place of a real job-class
/// registry, logs and deletes each row it executes. Real deployments
/// supply their own `JobRunner` wired to their job classes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;
    let config = LockerConfig::from_env()?;
    info!(?config, "starting locker");

    let pool = db::make_pool(&database_url).await?;
    let runner_pool = pool.clone();
    let runner = Arc::new(RunnerFn(move |job: pglocker::JobDescriptor| {
        let pool = runner_pool.clone();
        async move {
            // Re-read and retire the row under the inherited lock.
            let job_class: Option<String> =
                sqlx::query_scalar("SELECT job_class FROM jobs WHERE job_id = $1")
                    .bind(job.job_id)
                    .fetch_optional(&pool)
                    .await?;
            let Some(job_class) = job_class else {
                return Ok(());
            };
            if job.run_at > chrono::Utc::now() {
                info!(job_id = job.job_id, %job_class, "job not yet due, deferring");
                return Ok(());
            }
            info!(job_id = job.job_id, %job_class, "worked job");
            sqlx::query("DELETE FROM jobs WHERE job_id = $1")
                .bind(job.job_id)
                .execute(&pool)
                .await?;
            anyhow::Ok(())
        }
    }));

    let locker = Locker::start(pool, runner, config).await?;
    info!(backend_pid = locker.backend_pid(), "locker started; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    locker.stop_and_wait().await;

    Ok(())
}
