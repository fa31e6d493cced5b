mod domain;
mod events;
mod product;
mod repository;

use anyhow::{Context, Result};
use common::config::Config;
use common::logging::LoggingLayer;
use common::{db, shutdown, telemetry};
use product::ProductServiceImpl;
use proto::product::product_service_server::ProductServiceServer;
use repository::PgProductRepository;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    telemetry::init(config.log_format);

    let pool = db::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    db::migrate(&pool).await.context("failed to run migrations")?;

    let addr = config.product_addr;
    let product_service = ProductServiceImpl::new(PgProductRepository::new(pool));

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;

    info!("Product service listening on {}", addr);

    Server::builder()
        .layer(LoggingLayer)
        .add_service(reflection)
        .add_service(ProductServiceServer::new(product_service))
        .serve_with_shutdown(addr, shutdown::signal())
        .await
        .context("product server failed")?;

    info!("Product service stopped");
    Ok(())
}
