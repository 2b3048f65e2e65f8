use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::{LanguageConfig, ServerConfig};
use crate::coordinator::MatchCoordinator;
use crate::queue::JudgeQueue;
use crate::routes::{exit, json_error_handler, run_handler, submit_handler};

pub fn build_server(
    server_config: ServerConfig,
    languages: Arc<Vec<LanguageConfig>>,
    db_pool: Arc<SqlitePool>,
    queue: Arc<JudgeQueue>,
    coordinator: Arc<MatchCoordinator>,
) -> std::io::Result<Server> {
    let db_pool = web::Data::from(db_pool);
    let languages = web::Data::from(languages);
    let queue = web::Data::from(queue);
    let coordinator = web::Data::from(coordinator);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(languages.clone())
            .app_data(queue.clone())
            .app_data(coordinator.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(run_handler)
            .service(submit_handler)
            .service(exit)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
