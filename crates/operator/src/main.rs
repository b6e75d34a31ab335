//! Operator entrypoint

use std::sync::Arc;

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware, web::Data,
};
use clap::Parser;
use kube::Client;
use marketplace::config::{AirgapArgs, Cli, Command};
use marketplace::lease::{AlwaysLeader, LeadershipOracle, LeaseOracle};
use marketplace::scheduler::SchedulerConfig;
use marketplace::store::FileStore;
use marketplace::{State, reporter, telemetry};
use tracing::{info, instrument, warn};

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Airgap(args) => {
            telemetry::init(&cli.telemetry, "airgap")?;
            airgap(args).await
        }
        Command::Report(args) => {
            telemetry::init(&cli.telemetry, "report")?;
            reporter::run(args).await?;
            Ok(())
        }
    }
}

#[instrument(level = "info", target = "operator::main", name = "airgap", skip(args))]
async fn airgap(args: AirgapArgs) -> anyhow::Result<()> {
    let state = State::default();

    let store = Arc::new(match &args.file_store_path {
        Some(path) => FileStore::open(path).await?,
        None => {
            warn!("no file store path configured, using an in-memory store");
            FileStore::in_memory()
        }
    });

    let leadership: Arc<dyn LeadershipOracle> = if args.leader_election {
        let client = Client::try_default().await?;
        Arc::new(LeaseOracle::spawn(client, args.lease_name.clone()))
    } else {
        info!("leader election disabled, running as the only replica");
        Arc::new(AlwaysLeader)
    };

    let scheduler = SchedulerConfig {
        cron_expression: args.cleanup_cron.clone(),
        clean_after: args.clean_after.clone(),
        purge_after: args.purge_after.clone(),
        leadership,
        store,
        state: state.clone(),
    }
    .start_scheduler();

    if scheduler.is_none() {
        info!("tombstone cleanup is not scheduled");
    }

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(index)
    })
    .bind(args.bind_address.as_str())?
    .shutdown_timeout(5);

    server.run().await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }

    info!("airgap maintenance shutdown complete");
    Ok(())
}
