pub mod admission;
pub mod auth;
pub mod bus;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod storage;
pub mod store;

use std::sync::Arc;

use log::info;
use rocket::fairing::AdHoc;

use admission::Admission;
use auth::{HmacTokenValidator, RemoteTokenValidator, TokenValidator};
use bus::{Bus, InMemoryBus};
use config::{Config, ValidatorConfig};
use dispatcher::Dispatcher;
use hub::Hub;
use metrics::Metrics;
use rate_limit::RateLimiter;
use storage::{HttpObjectStorage, LocalObjectStorage, ObjectStorage};
use store::{SqliteStore, StoreError};

/// Open the store named by the config and assemble the server. Store
/// failure is surfaced so the binary can exit with the collaborator code.
pub fn rocket_with_config(config: Config) -> Result<rocket::Rocket<rocket::Build>, StoreError> {
    let store = Arc::new(SqliteStore::open(&config.store_dsn)?);
    Ok(build_rocket(config, store, Arc::new(InMemoryBus::new())))
}

/// Assemble the server around an existing store and bus. Tests use this to
/// share one bus between several instances.
pub fn build_rocket(
    config: Config,
    store: Arc<SqliteStore>,
    bus: Arc<dyn Bus>,
) -> rocket::Rocket<rocket::Build> {
    let metrics = Arc::new(Metrics::new());

    let validator: Arc<dyn TokenValidator> = match &config.validator {
        ValidatorConfig::Hmac { secret } => Arc::new(HmacTokenValidator::new(secret)),
        ValidatorConfig::Remote { base_url } => Arc::new(RemoteTokenValidator::new(base_url)),
    };

    let storage: Arc<dyn ObjectStorage> = match &config.upload_endpoint {
        Some(endpoint) => Arc::new(HttpObjectStorage::new(
            endpoint,
            &config.upload_bucket,
            config.upload_public_base.as_deref(),
        )),
        None => Arc::new(LocalObjectStorage::new(
            &config.upload_dir,
            config.upload_public_base.as_deref(),
        )),
    };

    let hub = Hub::new(bus.clone(), metrics.clone(), config.reg_cap);
    let dispatcher = Arc::new(Dispatcher::new(
        validator.clone(),
        Admission::new(store.clone()),
        store,
        bus,
        hub.clone(),
        metrics.clone(),
    ));

    let figment = rocket::Config::figment()
        .merge(("address", config.host.to_string()))
        .merge(("port", config.port))
        // multipart uploads: 10 MiB of payload plus form overhead
        .merge(("limits.file", 11 * 1024 * 1024))
        .merge(("limits.data-form", 11 * 1024 * 1024));

    let metrics_path = config.metrics_path.clone();
    let hub_liftoff = hub.clone();

    rocket::custom(figment)
        .manage(config)
        .manage(hub)
        .manage(dispatcher)
        .manage(metrics)
        .manage(validator)
        .manage(storage)
        .manage(RateLimiter::new())
        .register("/", rocket::catchers![routes::not_found])
        .mount(
            "/",
            rocket::routes![routes::chat_socket, routes::upload_file, routes::health],
        )
        .mount(metrics_path.as_str(), rocket::routes![routes::metrics_scrape])
        .attach(AdHoc::on_liftoff("Hub Loops", move |_rocket| {
            Box::pin(async move {
                hub_liftoff.start();
                info!("hub control and bus loops started");
            })
        }))
        .attach(AdHoc::on_shutdown("Hub Shutdown", |rocket| {
            Box::pin(async move {
                if let Some(hub) = rocket.state::<Arc<Hub>>() {
                    hub.shutdown();
                    info!("hub stopped, connections closing");
                }
            })
        }))
}
