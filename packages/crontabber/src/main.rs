//! CLI entry point.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use sqlx::postgres::PgPoolOptions;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crontabber::{
    app, Config, CronTabber, JobContext, JobInvoker, JobRegistry, PgStore, SuccessStream,
};

#[derive(Parser)]
#[command(
    name = "crontabber",
    version,
    about = "Periodic job runner with a durable state ledger"
)]
struct Cli {
    /// Run a specific job, by app name or class identity
    #[arg(long, short = 'j', value_name = "JOB")]
    job: Option<String>,

    /// Force running a job despite its schedule and dependencies
    #[arg(long, short = 'f')]
    force: bool,

    /// List all jobs
    #[arg(long, short = 'l')]
    list_jobs: bool,

    /// Exit 0, 1 or 2 with a health summary on stdout
    #[arg(long, short = 'n')]
    nagios: bool,

    /// Pretend a job has never been run
    #[arg(long, short = 'r', value_name = "JOB")]
    reset_job: Option<String>,

    /// Report state rows that no longer match a configured job
    #[arg(long)]
    audit_ghosts: bool,

    /// Check that all configured jobs are OK
    #[arg(long)]
    configtest: bool,
}

/// Reference job: appends a timestamp line to `<app_name>.log` in the
/// working directory. An embedding application registers its own jobs
/// here instead.
struct HeartbeatJob;

#[async_trait]
impl JobInvoker for HeartbeatJob {
    async fn invoke(&self, ctx: JobContext) -> Result<SuccessStream> {
        Ok(futures::stream::once(async move {
            let now = Utc::now();
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(format!("{}.log", ctx.app_name))
                .await?;
            file.write_all(format!("Now is {now}\n").as_bytes()).await?;
            Ok(now)
        })
        .boxed())
    }
}

fn job_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register("jobs::HeartbeatJob", "heartbeat", &[], || {
        Arc::new(HeartbeatJob)
    });
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crontabber=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let _sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let registry = job_registry();
    let specs = config.job_specs()?;

    // configtest needs no database at all
    if cli.configtest {
        let ok = app::configtest(&registry, &specs, &mut io::stderr())?;
        std::process::exit(if ok { 0 } else { 1 });
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgStore::create(pool).await?);

    let crontabber = CronTabber::new(
        &registry,
        &specs,
        store.clone(),
        store,
        config.error_retry_seconds,
    )?;

    if cli.list_jobs {
        crontabber.list_jobs(&mut io::stdout()).await?;
    } else if cli.nagios {
        let code = crontabber.nagios(&mut io::stdout()).await?;
        std::process::exit(code);
    } else if let Some(target) = cli.reset_job.as_deref() {
        crontabber.reset_job(target).await?;
    } else if cli.audit_ghosts {
        crontabber.audit_ghosts(&mut io::stdout()).await?;
    } else if let Some(target) = cli.job.as_deref() {
        crontabber.run_one(target, cli.force).await?;
    } else {
        let cancel = crontabber.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing the current job");
                cancel.cancel();
            }
        });
        crontabber.run_all().await?;
    }
    Ok(())
}
