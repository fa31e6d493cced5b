mod domain;
mod events;
mod repository;
mod user;

use anyhow::{Context, Result};
use common::config::Config;
use common::logging::LoggingLayer;
use common::{db, shutdown, telemetry};
use proto::user::user_service_server::UserServiceServer;
use repository::PgUserRepository;
use tonic::transport::Server;
use tracing::info;
use user::UserServiceImpl;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    telemetry::init(config.log_format);

    let pool = db::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    db::migrate(&pool).await.context("failed to run migrations")?;

    let addr = config.user_addr;
    let user_service = UserServiceImpl::new(PgUserRepository::new(pool));

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;

    info!("User service listening on {}", addr);

    Server::builder()
        .layer(LoggingLayer)
        .add_service(reflection)
        .add_service(UserServiceServer::new(user_service))
        .serve_with_shutdown(addr, shutdown::signal())
        .await
        .context("user server failed")?;

    info!("User service stopped");
    Ok(())
}
