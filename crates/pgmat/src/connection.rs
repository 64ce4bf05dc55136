//! Database connections.
//!
//! [`Connection`] is the seam between the materializer and the database
//! client. [`PgConnection`] implements it on top of `tokio_postgres`.

use crate::command::{Command, CommandKind};
use crate::error::{OrmError, OrmResult};
use crate::placeholder;
use crate::procedure;
use crate::row::DataTable;
use crate::value::Value;
use std::error::Error;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_postgres::types::{FromSql, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    /// The underlying session ended without `close()`.
    Broken,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A database connection that can run commands.
///
/// Methods take `&self`; implementations synchronize internally.
pub trait Connection: Send + Sync {
    fn connection_string(&self) -> &str;

    fn state(&self) -> ConnectionState;

    fn open(&self) -> impl std::future::Future<Output = OrmResult<()>> + Send;

    fn close(&self) -> impl std::future::Future<Output = OrmResult<()>> + Send;

    /// Run one or more parameterless statements.
    fn batch_execute(&self, sql: &str) -> impl std::future::Future<Output = OrmResult<()>> + Send;

    /// Run a command and return the number of rows affected.
    fn execute(
        &self,
        command: &Command,
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Run a command and buffer its rows.
    fn query(
        &self,
        command: &Command,
    ) -> impl std::future::Future<Output = OrmResult<DataTable>> + Send;

    /// Ask the server to cancel the statement currently running on this
    /// connection. Succeeds when nothing is running.
    fn cancel(&self) -> impl std::future::Future<Output = OrmResult<()>> + Send;
}

/// A `tokio_postgres` connection.
pub struct PgConnection {
    connection_string: String,
    client: RwLock<Option<Arc<Client>>>,
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PgConnection {
    /// A closed connection for `connection_string`.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            client: RwLock::new(None),
        }
    }

    /// A closed connection for the `DATABASE_URL` environment variable.
    pub fn from_env() -> OrmResult<Self> {
        let url = std::env::var(ENV_DATABASE_URL)
            .map_err(|_| OrmError::Connection(format!("{ENV_DATABASE_URL} is not set")))?;
        Ok(Self::new(url))
    }

    /// Wrap a client that is already connected. The caller keeps driving its
    /// connection task.
    pub fn from_client(connection_string: impl Into<String>, client: Client) -> Self {
        Self {
            connection_string: connection_string.into(),
            client: RwLock::new(Some(Arc::new(client))),
        }
    }

    fn current(&self) -> Option<Arc<Client>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn client(&self) -> OrmResult<Arc<Client>> {
        match self.current() {
            Some(client) if !client.is_closed() => Ok(client),
            Some(_) => Err(OrmError::Connection("connection is broken".into())),
            None => Err(OrmError::invalid_operation("connection is closed")),
        }
    }

    fn prepare_sql(command: &Command) -> OrmResult<(String, Vec<usize>)> {
        match command.kind() {
            CommandKind::Text => {
                let names = command.parameters().names();
                Ok(placeholder::to_positional(
                    command.text(),
                    command.prefix(),
                    &names,
                ))
            }
            CommandKind::StoredProcedure => {
                procedure::call_sql(command.text(), command.prefix(), command.parameters())
            }
        }
    }

    fn bind<'a>(command: &'a Command, order: &[usize]) -> Vec<&'a (dyn ToSql + Sync)> {
        order
            .iter()
            .map(|&i| command.parameters()[i].value() as &(dyn ToSql + Sync))
            .collect()
    }
}

impl Connection for PgConnection {
    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn state(&self) -> ConnectionState {
        match self.current() {
            Some(client) if client.is_closed() => ConnectionState::Broken,
            Some(_) => ConnectionState::Open,
            None => ConnectionState::Closed,
        }
    }

    async fn open(&self) -> OrmResult<()> {
        if self.state().is_open() {
            return Err(OrmError::invalid_operation("connection is already open"));
        }

        let (client, connection) = tokio_postgres::connect(&self.connection_string, NoTls)
            .await
            .map_err(|e| OrmError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(
                    target: "pgmat.sql",
                    error = %e,
                    "connection task ended with error"
                );
            }
        });

        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(client));
        tracing::debug!(target: "pgmat.sql", "connection opened");
        Ok(())
    }

    async fn close(&self) -> OrmResult<()> {
        let previous = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!(target: "pgmat.sql", "connection closed");
        }
        Ok(())
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        let client = self.client()?;
        client
            .batch_execute(sql)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn execute(&self, command: &Command) -> OrmResult<u64> {
        let client = self.client()?;
        let (sql, order) = Self::prepare_sql(command)?;
        let params = Self::bind(command, &order);
        tracing::trace!(target: "pgmat.sql", sql = %sql, param_count = params.len(), "execute");
        client
            .execute(sql.as_str(), &params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn query(&self, command: &Command) -> OrmResult<DataTable> {
        let client = self.client()?;
        let (sql, order) = Self::prepare_sql(command)?;
        let params = Self::bind(command, &order);
        tracing::trace!(target: "pgmat.sql", sql = %sql, param_count = params.len(), "query");

        let statement = client
            .prepare(&sql)
            .await
            .map_err(OrmError::from_db_error)?;
        let rows = client
            .query(&statement, &params)
            .await
            .map_err(OrmError::from_db_error)?;

        let mut table = DataTable::new(statement.columns().iter().map(|c| c.name()));
        for row in &rows {
            table.push_row(row_values(row)?)?;
        }
        Ok(table)
    }

    async fn cancel(&self) -> OrmResult<()> {
        let Some(client) = self.current() else {
            return Ok(());
        };
        client
            .cancel_token()
            .cancel_query(NoTls)
            .await
            .map_err(|e| OrmError::Connection(e.to_string()))
    }
}

/// Text-format fallback for enums, domains over text and extension types such
/// as `citext`.
struct AnyText(String);

impl<'a> FromSql<'a> for AnyText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(AnyText(std::str::from_utf8(raw)?.to_owned()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_)) || ty.name() == "citext"
    }
}

fn decode<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> OrmResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| OrmError::decode(row.columns()[idx].name(), e.to_string()))
}

fn column_value(row: &Row, idx: usize) -> OrmResult<Value> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => decode::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => decode::<i16>(row, idx)?.map(Value::I16),
        Type::INT4 => decode::<i32>(row, idx)?.map(Value::I32),
        Type::INT8 => decode::<i64>(row, idx)?.map(Value::I64),
        Type::OID => decode::<u32>(row, idx)?.map(|v| Value::I64(i64::from(v))),
        Type::FLOAT4 => decode::<f32>(row, idx)?.map(Value::F32),
        Type::FLOAT8 => decode::<f64>(row, idx)?.map(Value::F64),
        #[cfg(feature = "rust_decimal")]
        Type::NUMERIC => decode::<rust_decimal::Decimal>(row, idx)?.map(Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            decode::<String>(row, idx)?.map(Value::Text)
        }
        Type::BYTEA => decode::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Type::UUID => decode::<uuid::Uuid>(row, idx)?.map(Value::Uuid),
        Type::TIMESTAMP => decode::<chrono::NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => {
            decode::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(Value::TimestampTz)
        }
        Type::DATE => decode::<chrono::NaiveDate>(row, idx)?.map(Value::Date),
        Type::TIME => decode::<chrono::NaiveTime>(row, idx)?.map(Value::Time),
        Type::JSON | Type::JSONB => decode::<serde_json::Value>(row, idx)?.map(Value::Json),
        _ if AnyText::accepts(ty) => decode::<AnyText>(row, idx)?.map(|t| Value::Text(t.0)),
        _ => {
            return Err(OrmError::decode(
                row.columns()[idx].name(),
                format!("unsupported column type {}", ty.name()),
            ));
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn row_values(row: &Row) -> OrmResult<Vec<Value>> {
    (0..row.len()).map(|idx| column_value(row, idx)).collect()
}
