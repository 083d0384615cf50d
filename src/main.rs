use std::process;

use log::{error, info};

use roomcast::auth::RemoteTokenValidator;
use roomcast::config::{Config, ValidatorConfig};

// Exit codes: 0 normal, 1 configuration error, 2 required collaborator
// unreachable at startup.
#[rocket::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            process::exit(1);
        }
    };
    info!(
        "starting roomcast on {}:{} (bus {}, store {})",
        config.host, config.port, config.bus_addr, config.store_dsn
    );

    if let ValidatorConfig::Remote { base_url } = &config.validator {
        let probe = RemoteTokenValidator::new(base_url);
        if let Err(e) = probe.probe().await {
            error!("token validator unreachable: {e}");
            process::exit(2);
        }
    }

    let rocket = match roomcast::rocket_with_config(config) {
        Ok(rocket) => rocket,
        Err(e) => {
            error!("message store unavailable: {e}");
            process::exit(2);
        }
    };

    if let Err(e) = rocket.launch().await {
        error!("server failed to launch: {e}");
        process::exit(1);
    }
}
