//! The entity materializer: connection lifecycle, transactions, command
//! creation and execution.
//!
//! ```ignore
//! use pgmat::{Materializer, PgConnection, params};
//!
//! let db = Materializer::connect(&std::env::var("DATABASE_URL")?).await?;
//! let users: Vec<User> = db
//!     .query_as(
//!         "SELECT id, username FROM users WHERE id IN (@ids) AND status = @status",
//!         params! { ids: vec![1_i64, 2, 3], status: "active" },
//!     )
//!     .await?;
//! ```

use crate::binder::ParameterBinder;
use crate::command::{Command, CommandKind};
use crate::config::MaterializerConfig;
use crate::connection::{Connection, ConnectionState, PgConnection};
use crate::error::{OrmError, OrmResult};
use crate::param::ParamSource;
use crate::procedure::{self, Procedure, ProcedureResult};
use crate::row::{DataReader, DataTable, FromRow};
use crate::transaction::{self, IsolationLevel, Transaction};
use crate::value::{FromValue, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Truncate a string to at most `max_bytes` bytes on a UTF-8 char boundary.
fn truncate_sql_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Runs commands against a [`Connection`] and maps the results.
///
/// The connection and the active transaction sit behind two independent
/// locks, so property access is thread-safe. Executing commands concurrently
/// on one materializer is not supported.
pub struct Materializer<C: Connection> {
    connection: Mutex<Arc<C>>,
    transaction: Mutex<Option<Transaction>>,
    disposed: AtomicBool,
    config: MaterializerConfig,
    binder: ParameterBinder,
}

impl<C: Connection> std::fmt::Debug for Materializer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("transaction", &*self.transaction_slot())
            .field("disposed", &self.is_disposed())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Materializer<PgConnection> {
    /// Open a Postgres connection and wrap it.
    pub async fn connect(connection_string: &str) -> OrmResult<Self> {
        let materializer = Self::new(PgConnection::new(connection_string));
        materializer.open().await?;
        Ok(materializer)
    }
}

impl<C: Connection> Materializer<C> {
    pub fn new(connection: C) -> Self {
        Self::build(Arc::new(connection), MaterializerConfig::default())
    }

    /// Wrap `connection` with a custom configuration.
    ///
    /// Fails with [`OrmError::InvalidArgument`] when the configuration is
    /// invalid, e.g. a zero command timeout read from a config file.
    pub fn with_config(connection: C, config: MaterializerConfig) -> OrmResult<Self> {
        Self::from_arc(Arc::new(connection), config)
    }

    /// Share a connection that other code also holds.
    pub fn from_arc(connection: Arc<C>, config: MaterializerConfig) -> OrmResult<Self> {
        config.validate()?;
        Ok(Self::build(connection, config))
    }

    fn build(connection: Arc<C>, config: MaterializerConfig) -> Self {
        Self {
            connection: Mutex::new(connection),
            transaction: Mutex::new(None),
            disposed: AtomicBool::new(false),
            binder: ParameterBinder::new(config.parameter_prefix),
            config,
        }
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    pub fn binder(&self) -> &ParameterBinder {
        &self.binder
    }

    // ── state ───────────────────────────────────────────────────────────

    fn connection_slot(&self) -> MutexGuard<'_, Arc<C>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transaction_slot(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_not_disposed(&self) -> OrmResult<()> {
        if self.is_disposed() {
            Err(OrmError::Disposed)
        } else {
            Ok(())
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> OrmResult<Arc<C>> {
        self.ensure_not_disposed()?;
        Ok(Arc::clone(&self.connection_slot()))
    }

    /// Swap the underlying connection. Not allowed while a transaction is
    /// active.
    pub fn set_connection(&self, connection: C) -> OrmResult<()> {
        self.ensure_not_disposed()?;
        if self.transaction_slot().is_some() {
            return Err(OrmError::invalid_operation(
                "cannot replace the connection while a transaction is active",
            ));
        }
        *self.connection_slot() = Arc::new(connection);
        Ok(())
    }

    pub fn connection_string(&self) -> OrmResult<String> {
        Ok(self.connection()?.connection_string().to_string())
    }

    pub fn state(&self) -> OrmResult<ConnectionState> {
        Ok(self.connection()?.state())
    }

    /// The connection, which must be open.
    fn open_connection(&self) -> OrmResult<Arc<C>> {
        let conn = self.connection()?;
        if !conn.state().is_open() {
            return Err(OrmError::invalid_operation(format!(
                "connection is {:?}; open it first",
                conn.state()
            )));
        }
        Ok(conn)
    }

    pub async fn open(&self) -> OrmResult<()> {
        let conn = self.connection()?;
        conn.open().await
    }

    /// Close the connection. An active transaction is rolled back first.
    pub async fn close(&self) -> OrmResult<()> {
        let conn = self.connection()?;
        self.abandon_transaction(&conn).await;
        conn.close().await
    }

    /// Release the connection. Every later call fails with
    /// [`OrmError::Disposed`]. Disposing twice is a no-op.
    pub async fn dispose(&self) -> OrmResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let conn = Arc::clone(&self.connection_slot());
        self.abandon_transaction(&conn).await;
        tracing::debug!(target: "pgmat.tx", "materializer disposed");
        conn.close().await
    }

    async fn abandon_transaction(&self, conn: &C) {
        let Some(tx) = self.transaction_slot().take() else {
            return;
        };
        if !conn.state().is_open() {
            return;
        }
        match conn.batch_execute(transaction::ROLLBACK_SQL).await {
            Ok(()) => tracing::debug!(
                target: "pgmat.tx",
                tx_id = tx.id(),
                "pending transaction rolled back"
            ),
            Err(e) => tracing::warn!(
                target: "pgmat.tx",
                tx_id = tx.id(),
                error = %e,
                "rollback of pending transaction failed"
            ),
        }
    }

    // ── transactions ────────────────────────────────────────────────────

    /// The active transaction, if any.
    pub fn transaction(&self) -> Option<Transaction> {
        self.transaction_slot().clone()
    }

    fn active_transaction(&self) -> OrmResult<Transaction> {
        self.transaction_slot()
            .clone()
            .ok_or_else(|| OrmError::invalid_operation("no transaction is active"))
    }

    async fn begin(
        &self,
        isolation_level: IsolationLevel,
        read_only: bool,
    ) -> OrmResult<Transaction> {
        let conn = self.open_connection()?;
        if self.transaction_slot().is_some() {
            return Err(OrmError::invalid_operation("a transaction is already active"));
        }

        let tx = Transaction::new(isolation_level, read_only);
        conn.batch_execute(&tx.begin_sql()).await?;
        *self.transaction_slot() = Some(tx.clone());
        tracing::debug!(
            target: "pgmat.tx",
            tx_id = tx.id(),
            isolation = tx.isolation_level().as_sql(),
            read_only,
            "transaction started"
        );
        Ok(tx)
    }

    /// Start a transaction. Commands created afterwards join it.
    pub async fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> OrmResult<Transaction> {
        self.begin(isolation_level, false).await
    }

    pub async fn begin_read_only_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> OrmResult<Transaction> {
        self.begin(isolation_level, true).await
    }

    async fn finish(&self, sql: &'static str, action: &'static str) -> OrmResult<()> {
        let conn = self.open_connection()?;
        // A failed COMMIT or ROLLBACK still ends the transaction server-side.
        let tx = self
            .transaction_slot()
            .take()
            .ok_or_else(|| OrmError::invalid_operation("no transaction is active"))?;
        let result = conn.batch_execute(sql).await;
        match &result {
            Ok(()) => tracing::debug!(target: "pgmat.tx", tx_id = tx.id(), "transaction {action}"),
            Err(e) => tracing::warn!(
                target: "pgmat.tx",
                tx_id = tx.id(),
                error = %e,
                "transaction {action} failed"
            ),
        }
        result
    }

    pub async fn commit(&self) -> OrmResult<()> {
        self.finish(transaction::COMMIT_SQL, "committed").await
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        self.finish(transaction::ROLLBACK_SQL, "rolled back").await
    }

    async fn savepoint_statement(&self, sql: OrmResult<String>) -> OrmResult<()> {
        let conn = self.open_connection()?;
        let tx = self.active_transaction()?;
        let sql = sql?;
        tracing::debug!(target: "pgmat.tx", tx_id = tx.id(), sql = %sql, "savepoint");
        conn.batch_execute(&sql).await
    }

    pub async fn save_point(&self, name: &str) -> OrmResult<()> {
        self.savepoint_statement(transaction::savepoint_sql(name)).await
    }

    pub async fn rollback_to_save_point(&self, name: &str) -> OrmResult<()> {
        self.savepoint_statement(transaction::rollback_to_savepoint_sql(name))
            .await
    }

    pub async fn release_save_point(&self, name: &str) -> OrmResult<()> {
        self.savepoint_statement(transaction::release_savepoint_sql(name))
            .await
    }

    // ── command factory ─────────────────────────────────────────────────

    pub fn command_timeout(&self) -> Duration {
        self.config.command_timeout
    }

    /// Timeout stamped on commands created from now on. Zero is rejected.
    pub fn set_command_timeout(&mut self, timeout: Duration) -> OrmResult<()> {
        if timeout.is_zero() {
            return Err(OrmError::invalid_argument(
                "command timeout must be greater than zero",
            ));
        }
        self.config.command_timeout = timeout;
        Ok(())
    }

    fn new_command(
        &self,
        text: &str,
        kind: CommandKind,
        transaction: Option<&Transaction>,
    ) -> OrmResult<Command> {
        let mut command = Command::new(text);
        command.set_kind(kind);
        command.set_prefix(self.binder.prefix());
        command.set_transaction(transaction.cloned().or_else(|| self.transaction()));
        command.set_timeout(self.config.command_timeout)?;
        Ok(command)
    }

    /// Build a command and bind `params` onto it.
    ///
    /// Without an explicit `transaction` the command joins the active one.
    pub fn create_command<'p>(
        &self,
        sql: &str,
        kind: CommandKind,
        params: impl Into<ParamSource<'p>>,
        transaction: Option<&Transaction>,
    ) -> OrmResult<Command> {
        self.ensure_not_disposed()?;
        if kind == CommandKind::StoredProcedure {
            procedure::validate_procedure_name(sql)?;
        }
        let mut command = self.new_command(sql, kind, transaction)?;
        self.binder.bind_source(&mut command, params.into());
        Ok(command)
    }

    /// Build a stored procedure command from a descriptor.
    pub fn create_procedure_command<P: Procedure + ?Sized>(
        &self,
        procedure: &P,
        transaction: Option<&Transaction>,
    ) -> OrmResult<Command> {
        self.ensure_not_disposed()?;
        procedure::validate_procedure_name(procedure.name())?;
        let mut command =
            self.new_command(procedure.name(), CommandKind::StoredProcedure, transaction)?;
        self.binder
            .bind_parameters(&mut command, procedure.parameters());
        Ok(command)
    }

    // ── execution ───────────────────────────────────────────────────────

    /// Checks shared by every execution: disposed, open connection, and the
    /// command belonging to the active transaction.
    fn prepare(&self, command: &Command) -> OrmResult<Arc<C>> {
        let conn = self.open_connection()?;
        let active = self.transaction();
        if command.transaction() != active.as_ref() {
            return Err(OrmError::invalid_operation(match (command.transaction(), active) {
                (Some(_), None) => "command's transaction is no longer active".to_string(),
                (None, Some(_)) => "command must be part of the active transaction".to_string(),
                _ => "command belongs to a different transaction".to_string(),
            }));
        }
        Ok(conn)
    }

    fn log_command<T>(
        &self,
        op: &'static str,
        command: &Command,
        elapsed: Duration,
        result: &OrmResult<T>,
    ) {
        let full_sql = if self.config.log_parameters {
            command.to_display_sql()
        } else {
            command.text().to_string()
        };
        let sql = match self.config.max_logged_sql {
            Some(max) if full_sql.len() > max => {
                format!("{}...", truncate_sql_bytes(&full_sql, max))
            }
            _ => full_sql,
        };
        let duration_ms = elapsed.as_millis() as u64;
        let tx_id = command.transaction().map(Transaction::id);
        let slow = self
            .config
            .slow_command_threshold
            .is_some_and(|threshold| elapsed >= threshold);

        match result {
            Err(e @ (OrmError::Timeout(_) | OrmError::Cancelled)) => tracing::warn!(
                target: "pgmat.sql",
                op,
                sql = %sql,
                param_count = command.parameters().len(),
                duration_ms,
                tx_id = ?tx_id,
                error = %e,
                "command interrupted"
            ),
            Err(e) => tracing::debug!(
                target: "pgmat.sql",
                op,
                sql = %sql,
                param_count = command.parameters().len(),
                duration_ms,
                tx_id = ?tx_id,
                error = %e,
                "command failed"
            ),
            Ok(_) if slow => tracing::warn!(
                target: "pgmat.sql",
                op,
                sql = %sql,
                param_count = command.parameters().len(),
                duration_ms,
                tx_id = ?tx_id,
                "slow command"
            ),
            Ok(_) => tracing::debug!(
                target: "pgmat.sql",
                op,
                sql = %sql,
                param_count = command.parameters().len(),
                duration_ms,
                tx_id = ?tx_id,
                "command executed"
            ),
        }
    }

    /// Race `operation` against the command timeout and `cancel`. Either one
    /// firing asks the server to cancel the running statement.
    async fn run<T, F, X>(
        &self,
        op: &'static str,
        conn: &C,
        command: &Command,
        operation: F,
        cancel: X,
    ) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>>,
        X: Future<Output = ()>,
    {
        let started = Instant::now();
        let timeout = command.timeout();
        let result = tokio::select! {
            result = operation => result,
            _ = tokio::time::sleep(timeout) => {
                if let Err(e) = conn.cancel().await {
                    tracing::warn!(target: "pgmat.sql", error = %e, "cancel request failed");
                }
                Err(OrmError::Timeout(timeout))
            }
            _ = cancel => {
                if let Err(e) = conn.cancel().await {
                    tracing::warn!(target: "pgmat.sql", error = %e, "cancel request failed");
                }
                Err(OrmError::Cancelled)
            }
        };
        self.log_command(op, command, started.elapsed(), &result);
        result
    }

    async fn execute_command_with<X>(&self, command: &Command, cancel: X) -> OrmResult<u64>
    where
        X: Future<Output = ()>,
    {
        let conn = self.prepare(command)?;
        self.run("execute", &conn, command, conn.execute(command), cancel)
            .await
    }

    async fn query_command_with<X>(&self, command: &Command, cancel: X) -> OrmResult<DataTable>
    where
        X: Future<Output = ()>,
    {
        let conn = self.prepare(command)?;
        self.run("query", &conn, command, conn.query(command), cancel)
            .await
    }

    /// Run a prepared command and return the number of rows affected.
    pub async fn execute_command(&self, command: &Command) -> OrmResult<u64> {
        self.execute_command_with(command, std::future::pending())
            .await
    }

    /// Run a prepared command and buffer its rows.
    pub async fn query_command(&self, command: &Command) -> OrmResult<DataTable> {
        self.query_command_with(command, std::future::pending())
            .await
    }

    /// Execute a statement and return the number of rows affected.
    pub async fn execute<'p>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<u64> {
        let command = self.create_command(sql, CommandKind::Text, params, None)?;
        self.execute_command(&command).await
    }

    /// [`Materializer::execute`] that gives up with [`OrmError::Cancelled`]
    /// once `cancel` completes.
    pub async fn execute_cancellable<'p, X>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
        cancel: X,
    ) -> OrmResult<u64>
    where
        X: Future<Output = ()>,
    {
        let command = self.create_command(sql, CommandKind::Text, params, None)?;
        self.execute_command_with(&command, cancel).await
    }

    /// Run a query and buffer its rows.
    pub async fn query<'p>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<DataTable> {
        let command = self.create_command(sql, CommandKind::Text, params, None)?;
        self.query_command(&command).await
    }

    pub async fn query_cancellable<'p, X>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
        cancel: X,
    ) -> OrmResult<DataTable>
    where
        X: Future<Output = ()>,
    {
        let command = self.create_command(sql, CommandKind::Text, params, None)?;
        self.query_command_with(&command, cancel).await
    }

    fn scalar<T: FromValue>(table: &DataTable) -> OrmResult<T> {
        match table.first().filter(|row| !row.is_empty()) {
            Some(row) => row.get(0),
            None => T::from_value(&Value::Null)
                .map_err(|e| OrmError::decode("?column?", e.to_string())),
        }
    }

    /// First column of the first row. No rows reads as `NULL`, so use
    /// `Option<T>` when the result may be empty.
    pub async fn execute_scalar<'p, T: FromValue>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<T> {
        let table = self.query(sql, params).await?;
        Self::scalar(&table)
    }

    pub async fn execute_scalar_cancellable<'p, T, X>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
        cancel: X,
    ) -> OrmResult<T>
    where
        T: FromValue,
        X: Future<Output = ()>,
    {
        let table = self.query_cancellable(sql, params, cancel).await?;
        Self::scalar(&table)
    }

    /// Run a query and return a forward-only reader over its rows.
    pub async fn execute_reader<'p>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<DataReader> {
        Ok(self.query(sql, params).await?.into_reader())
    }

    /// Run a query and map every row onto `T`.
    pub async fn query_as<'p, T: FromRow>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<Vec<T>> {
        self.query(sql, params).await?.map_rows()
    }

    pub async fn query_as_cancellable<'p, T, X>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
        cancel: X,
    ) -> OrmResult<Vec<T>>
    where
        T: FromRow,
        X: Future<Output = ()>,
    {
        self.query_cancellable(sql, params, cancel)
            .await?
            .map_rows()
    }

    /// Map the first row onto `T`.
    ///
    /// Returns [`OrmError::NotFound`] when there are no rows; extra rows are
    /// ignored.
    pub async fn query_one_as<'p, T: FromRow>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<T> {
        let table = self.query(sql, params).await?;
        match table.first() {
            Some(row) => T::from_row(row),
            None => Err(OrmError::not_found("Expected 1 row, got 0")),
        }
    }

    /// Map the only row onto `T`.
    ///
    /// Unlike [`Materializer::query_one_as`], more than one row is an error:
    /// [`OrmError::NotFound`] for none, [`OrmError::TooManyRows`] for several.
    pub async fn query_one_strict_as<'p, T: FromRow>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<T> {
        let table = self.query(sql, params).await?;
        match table.rows() {
            [row] => T::from_row(row),
            [] => Err(OrmError::not_found("Expected 1 row, got 0")),
            rows => Err(OrmError::too_many_rows(1, rows.len())),
        }
    }

    /// Map the first row onto `T`, if there is one.
    pub async fn query_opt_as<'p, T: FromRow>(
        &self,
        sql: &str,
        params: impl Into<ParamSource<'p>>,
    ) -> OrmResult<Option<T>> {
        let table = self.query(sql, params).await?;
        table.first().map(T::from_row).transpose()
    }

    /// Call a stored procedure and collect its rows and output values.
    pub async fn execute_procedure<P: Procedure + ?Sized>(
        &self,
        procedure: &P,
    ) -> OrmResult<ProcedureResult> {
        let mut command = self.create_procedure_command(procedure, None)?;
        let table = self.query_command(&command).await?;
        procedure::apply_outputs(&mut command, &table);
        Ok(ProcedureResult::new(table, &command))
    }

    /// Call a set-returning procedure and map its rows onto `T`.
    pub async fn query_procedure_as<P, T>(&self, procedure: &P) -> OrmResult<Vec<T>>
    where
        P: Procedure + ?Sized,
        T: FromRow,
    {
        let command = self.create_procedure_command(procedure, None)?;
        self.query_command(&command).await?.map_rows()
    }

    /// Run parameterless statements, e.g. DDL.
    pub async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        let conn = self.open_connection()?;
        conn.batch_execute(sql).await
    }
}

#[cfg(test)]
mod tests;
