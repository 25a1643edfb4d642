use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use tourdb::{Catalog, Config, RecordStore};

mod handlers;

/// Shared application state
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub catalog: Catalog,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    log::info!("Starting TourDB dashboard server");

    let config = Config::from_env().map_err(std::io::Error::other)?;

    log::info!("Opening store at: {}", config.data_file.display());
    let store = RecordStore::open(&config.data_file).map_err(std::io::Error::other)?;
    let catalog = Catalog::dashboard(&config).map_err(std::io::Error::other)?;

    let state = web::Data::new(AppState {
        store: Arc::new(store),
        catalog,
    });

    let host = config.host.clone();
    let port = config.port;
    log::info!("Listening on {host}:{port}");
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
