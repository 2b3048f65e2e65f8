pub mod config;
pub mod coordinator;
pub mod database;
pub mod events;
pub mod judge;
pub mod queue;
pub mod routes;
pub mod web_server;
pub mod worker;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
