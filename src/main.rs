//! trend-missions: binary entrypoint.
//!
//! `trend-missions`        serve the HTTP API and run the job schedulers
//! `trend-missions once`   run collect, aggregate and assign once, then exit
//! `trend-missions <job>`  run a single job (`collect`, `aggregate`, `assign`)

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use trend_missions::config::PipelineConfig;
use trend_missions::ingest::providers;
use trend_missions::metrics::Metrics;
use trend_missions::notify::NotifierMux;
use trend_missions::{api, scheduler, Job, Pipeline};

enum Command {
    Serve,
    Once,
    Single(Job),
}

fn parse_args() -> Result<Command> {
    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => Ok(Command::Serve),
        Some("once") => Ok(Command::Once),
        Some("collect") => Ok(Command::Single(Job::Collect)),
        Some("aggregate") => Ok(Command::Single(Job::Aggregate)),
        Some("assign") => Ok(Command::Single(Job::Assign)),
        Some(other) => bail!("unknown command `{other}` (expected serve | once | collect | aggregate | assign)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    trend_missions::init_tracing();

    let cmd = parse_args()?;
    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let metrics = Metrics::install()?;
    let collectors = providers::from_config(&cfg.collectors)?;
    let notifier = NotifierMux::from_env(&cfg.notify);
    let pipeline = Arc::new(Pipeline::new(cfg, collectors, notifier)?);

    match cmd {
        Command::Once => {
            let mut failed = 0;
            for (job, res) in pipeline.run_once(Utc::now()).await {
                match res {
                    Ok(out) => println!("{job}: {out}"),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{job}: {e:#}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} job(s) failed");
            }
            Ok(())
        }
        Command::Single(job) => {
            let out = pipeline.run_job(job, Utc::now()).await?;
            println!("{job}: {out}");
            Ok(())
        }
        Command::Serve => serve(pipeline, metrics).await,
    }
}

async fn serve(pipeline: Arc<Pipeline>, metrics: Metrics) -> Result<()> {
    let bind = pipeline.config().server.bind.clone();
    let jobs = scheduler::spawn_all(Arc::clone(&pipeline), &pipeline.config().schedule);

    let app = api::router(pipeline, &metrics);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(target: "pipeline", %bind, "http api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "pipeline", "shutdown requested");
        })
        .await
        .context("http server")?;

    for j in jobs {
        j.abort();
    }
    Ok(())
}
