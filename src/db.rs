use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io};

use uuid::Uuid;

use crate::config::ConnectionConfig;

mod mysql;

pub use self::mysql::MySqlDriver;

/// Something that can turn a resolved config into a live connection.
pub trait Driver: Send + Sync {
    type Conn: Send;

    fn connect(&self, config: &ConnectionConfig) -> Result<Self::Conn, DriverError>;

    fn disconnect(&self, conn: Self::Conn) -> Result<(), DriverError>;
}

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    MySql(#[from] mysql_async::Error),
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),
    #[error("cannot start driver runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("cannot connect to {url}: {source}")]
    ConnectionFailed {
        url: String,
        #[source]
        source: DriverError,
    },
    #[error("cannot release connection {id}: {source}")]
    ReleaseFailed {
        id: Uuid,
        #[source]
        source: DriverError,
    },
}

/// A connection handed out by [`Gateway::open`]. Release it with [`Gateway::close`].
pub struct Connection<C> {
    id: Uuid,
    inner: C,
}

impl<C> Connection<C> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<C> Deref for Connection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C> DerefMut for Connection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl<C> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Opens and closes connections for one resolved config.
///
/// Every `open` is a fresh connection: no pooling, no retries.
pub struct Gateway<D> {
    config: Arc<ConnectionConfig>,
    driver: D,
}

impl Gateway<MySqlDriver> {
    pub fn mysql(config: Arc<ConnectionConfig>) -> Result<Self, DriverError> {
        Ok(Gateway::new(config, MySqlDriver::new()?))
    }
}

impl<D: Driver> Gateway<D> {
    pub fn new(config: Arc<ConnectionConfig>, driver: D) -> Self {
        Gateway { config, driver }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn open(&self) -> Result<Connection<D::Conn>, GatewayError> {
        let inner = self
            .driver
            .connect(&self.config)
            .map_err(|source| GatewayError::ConnectionFailed {
                url: self.config.url().to_string(),
                source,
            })?;

        let conn = Connection {
            id: Uuid::new_v4(),
            inner,
        };
        log::debug!("opened connection {} to {}", conn.id, self.config.url());
        Ok(conn)
    }

    /// Releases `conn`. Never fails: release errors are logged and dropped so
    /// they cannot hide whatever error the caller is already handling.
    pub fn close(&self, conn: Option<Connection<D::Conn>>) {
        let conn = match conn {
            Some(conn) => conn,
            None => return,
        };

        let id = conn.id;
        match self.driver.disconnect(conn.inner) {
            Ok(()) => log::debug!("closed connection {}", id),
            Err(source) => {
                let err = GatewayError::ReleaseFailed { id, source };
                log::error!("{}", err);
            }
        }
    }

    /// Opens a connection, hands it to `f`, and closes it once `f` returns
    /// or unwinds.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&mut Connection<D::Conn>) -> T,
    {
        let mut release = Release {
            gateway: self,
            conn: None,
        };
        let conn = release.conn.get_or_insert(self.open()?);
        let out = f(conn);
        Ok(out)
    }
}

struct Release<'a, D: Driver> {
    gateway: &'a Gateway<D>,
    conn: Option<Connection<D::Conn>>,
}

impl<'a, D: Driver> Drop for Release<'a, D> {
    fn drop(&mut self) {
        self.gateway.close(self.conn.take());
    }
}
