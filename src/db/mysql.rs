//! MySQL driver backed by `mysql_async`, driven from synchronous callers.

use std::time::Duration;

use mysql_async::{Conn, OptsBuilder, SslOpts};
use tokio::runtime::{Builder, Runtime};

use super::{Driver, DriverError};
use crate::config::ConnectionConfig;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct MySqlDriver {
    runtime: Runtime,
}

impl MySqlDriver {
    pub fn new() -> Result<Self, DriverError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DriverError::Runtime)?;
        Ok(MySqlDriver { runtime })
    }
}

impl Driver for MySqlDriver {
    type Conn = Conn;

    fn connect(&self, config: &ConnectionConfig) -> Result<Conn, DriverError> {
        let opts = options(config)?;
        let timeout = connect_timeout(config)?;

        self.runtime.block_on(async {
            tokio::time::timeout(timeout, Conn::new(opts))
                .await
                .map_err(|_| DriverError::Timeout(timeout))?
                .map_err(DriverError::from)
        })
    }

    fn disconnect(&self, conn: Conn) -> Result<(), DriverError> {
        self.runtime
            .block_on(conn.disconnect())
            .map_err(DriverError::from)
    }
}

// Options come from the individual fields rather than the URL: the JDBC-style
// query parameters are not ones `mysql_async` understands.
fn options(config: &ConnectionConfig) -> Result<OptsBuilder, DriverError> {
    let port = config.port().parse::<u16>().map_err(|e| {
        DriverError::InvalidOptions(format!("port `{}`: {}", config.port(), e))
    })?;

    let mut builder = OptsBuilder::default()
        .ip_or_hostname(config.host())
        .tcp_port(port)
        .db_name(Some(config.database()))
        .user(Some(config.username()))
        .pass(Some(config.password()));

    if config.parameter("useSSL") == Some("true") {
        builder = builder.ssl_opts(SslOpts::default());
    }

    Ok(builder)
}

fn connect_timeout(config: &ConnectionConfig) -> Result<Duration, DriverError> {
    match config.parameter("connectTimeout") {
        Some(ms) => ms.parse::<u64>().map(Duration::from_millis).map_err(|e| {
            DriverError::InvalidOptions(format!("connectTimeout `{}`: {}", ms, e))
        }),
        None => Ok(DEFAULT_CONNECT_TIMEOUT),
    }
}
