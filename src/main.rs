use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use duel_judge::config::{CliArgs, Config};
use duel_judge::coordinator::MatchCoordinator;
use duel_judge::database as db;
use duel_judge::events::BroadcastSink;
use duel_judge::queue::JudgeQueue;
use duel_judge::web_server::build_server;
use duel_judge::worker::worker;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();

    let Config {
        server: server_config,
        judge: judge_config,
        languages: language_config,
        questions: question_config,
    } = cli.to_config().expect("Failed to load configuration");

    if judge_config.workers == 0 {
        panic!("The number of judge workers must not be 0");
    }

    let db_path = db::get_db_path();
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize database");
    db::seed_questions(&question_config, &db_pool)
        .await
        .expect("Failed to seed questions");

    let language_config = Arc::new(language_config);
    let db_pool = Arc::new(db_pool);
    let judge_queue = Arc::new(JudgeQueue::new());
    let sink = Arc::new(BroadcastSink::new(EVENT_CHANNEL_CAPACITY));
    let coordinator = Arc::new(MatchCoordinator::new(sink));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=judge_config.workers {
        workers.spawn(worker(
            i,
            judge_config,
            language_config.clone(),
            coordinator.clone(),
            judge_queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(
        server_config,
        language_config,
        db_pool,
        judge_queue,
        coordinator,
    )
    .expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
