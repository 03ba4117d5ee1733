use std::process;
use std::sync::Arc;

use anyhow::Context as _;
use dbconf::config::{self, ConnectionConfig};
use dbconf::{db, logger};

fn load_config() -> anyhow::Result<Arc<ConnectionConfig>> {
    config::get().context("failed to load database configuration")
}

fn main() {
    dotenv::dotenv().ok();
    logger::init();

    // Without a config there is nothing this process can do.
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    };

    let gateway = match db::Gateway::mysql(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            log::error!("failed to start database driver: {}", e);
            process::exit(1);
        }
    };

    match gateway.open() {
        Ok(conn) => {
            log::info!(
                "connection {} established to {}",
                conn.id(),
                gateway.config().url()
            );
            gateway.close(Some(conn));
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(2);
        }
    }
}
