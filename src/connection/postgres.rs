//! tokio-postgres connector

use super::driver::{Connector, DriverConnection, QueryResult};
use super::value::{row_to_map, SqlParam};
use crate::config::PoolConfig;
use crate::tls::{classify_tls_failure, client_config};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::TryStreamExt;
use serde_json::Value;
use std::future::Future;
use tokio_postgres::config::SslMode as DriverSslMode;
use tokio_postgres::{Client, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::Instrument;

const APPLICATION_NAME: &str = "pg-trustpool";

/// Opens real Postgres sessions over TCP, with rustls when the config asks
/// for TLS
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresConnector;

impl PostgresConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }

    fn driver_config(config: &PoolConfig) -> tokio_postgres::Config {
        let target = config.target();
        let mut pg = tokio_postgres::Config::new();
        pg.host(config.server_name())
            .port(target.port)
            .user(&target.user)
            .dbname(&target.database)
            .application_name(APPLICATION_NAME)
            .connect_timeout(config.connection_timeout())
            .ssl_mode(if config.ssl_mode().uses_tls() {
                DriverSslMode::Require
            } else {
                DriverSslMode::Disable
            });

        if let Some(password) = config.password() {
            pg.password(password);
        }

        pg
    }

    async fn open(config: &PoolConfig) -> Result<PostgresConnection> {
        let pg = Self::driver_config(config);

        if config.ssl_mode().uses_tls() {
            let tls = MakeRustlsConnect::new(client_config(
                config.trust_mode(),
                config.trust_anchors(),
            )?);
            let (client, connection) = pg.connect(tls).await.map_err(map_driver_error)?;
            spawn_connection(connection);
            Ok(PostgresConnection { client, tls: true })
        } else {
            let (client, connection) = pg.connect(NoTls).await.map_err(map_driver_error)?;
            spawn_connection(connection);
            Ok(PostgresConnection { client, tls: false })
        }
    }
}

impl Connector for PostgresConnector {
    fn connect<'a>(&'a self, config: &'a PoolConfig) -> BoxFuture<'a, Result<Box<dyn DriverConnection>>> {
        let span = tracing::debug_span!(
            "connect",
            host = %config.target().host,
            port = config.target().port,
            trust_mode = %config.trust_mode(),
        );

        Box::pin(
            async move {
                let conn = Self::open(config).await?;
                tracing::debug!(tls = conn.tls, "connection established");
                Ok(Box::new(conn) as Box<dyn DriverConnection>)
            }
            .instrument(span),
        )
    }
}

/// Drive the session's I/O until the client is dropped or the socket fails
fn spawn_connection<F>(connection: F)
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "postgres connection terminated");
        }
    });
}

struct PostgresConnection {
    client: Client,
    tls: bool,
}

impl DriverConnection for PostgresConnection {
    fn query<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<QueryResult>> {
        Box::pin(async move {
            let params: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
            let stream = self
                .client
                .query_raw(sql, params)
                .await
                .map_err(map_driver_error)?;
            futures::pin_mut!(stream);

            let mut rows = Vec::new();
            while let Some(row) = stream.try_next().await.map_err(map_driver_error)? {
                rows.push(row_to_map(&row)?);
            }

            let row_count = stream.rows_affected().unwrap_or(rows.len() as u64);
            Ok(QueryResult { rows, row_count })
        })
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    fn is_tls(&self) -> bool {
        self.tls
    }
}

/// Map a driver error onto the crate taxonomy.
///
/// Server errors keep their SQLSTATE fields; handshake failures are split
/// into trust and non-trust TLS errors; everything else is a connection
/// error.
pub fn map_driver_error(err: tokio_postgres::Error) -> Error {
    if let Some(db) = err.as_db_error() {
        return Error::Query {
            code: db.code().code().to_string(),
            severity: db.severity().to_string(),
            message: db.message().to_string(),
            detail: db.detail().map(str::to_string),
            hint: db.hint().map(str::to_string),
        };
    }

    if let Some(tls) = classify_tls_failure(&err) {
        return tls;
    }

    Error::Connection(err.to_string())
}
