use super::*;
use crate::params;
use crate::procedure::StoredProcedure;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;

/// In-memory connection that records what it is asked to run.
#[derive(Debug)]
struct MockConnection {
    open: AtomicBool,
    statements: Mutex<Vec<String>>,
    results: Mutex<VecDeque<DataTable>>,
    delay: Option<Duration>,
    cancels: AtomicUsize,
}

impl MockConnection {
    fn closed() -> Self {
        Self {
            open: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            delay: None,
            cancels: AtomicUsize::new(0),
        }
    }

    fn opened() -> Self {
        let conn = Self::closed();
        conn.open.store(true, Ordering::SeqCst);
        conn
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn returning(self, table: DataTable) -> Self {
        self.results.lock().unwrap().push_back(table);
        self
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    async fn run(&self, command: &Command) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.statements.lock().unwrap().push(command.to_display_sql());
    }
}

impl Connection for MockConnection {
    fn connection_string(&self) -> &str {
        "mock://test"
    }

    fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&self) -> OrmResult<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> OrmResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    async fn execute(&self, command: &Command) -> OrmResult<u64> {
        self.run(command).await;
        Ok(1)
    }

    async fn query(&self, command: &Command) -> OrmResult<DataTable> {
        self.run(command).await;
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn cancel(&self) -> OrmResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn users() -> DataTable {
    DataTable::new(["id", "username"])
        .with_row(vec![Value::I64(1), Value::Text("ann".into())])
        .unwrap()
        .with_row(vec![Value::I64(2), Value::Text("bob".into())])
        .unwrap()
}

// ── lifecycle ───────────────────────────────────────────────────────────

#[tokio::test]
async fn operations_after_dispose_fail() {
    let m = Materializer::new(MockConnection::opened());
    m.dispose().await.unwrap();

    assert!(m.is_disposed());
    assert!(m.execute("SELECT 1", ()).await.unwrap_err().is_disposed());
    assert!(m
        .create_command("SELECT 1", CommandKind::Text, (), None)
        .unwrap_err()
        .is_disposed());
    assert!(m.connection().unwrap_err().is_disposed());
    assert!(m.begin_transaction(IsolationLevel::default()).await.unwrap_err().is_disposed());
    assert!(m.open().await.unwrap_err().is_disposed());

    // second dispose is a no-op
    m.dispose().await.unwrap();
}

#[tokio::test]
async fn dispose_rolls_back_and_closes() {
    let m = Materializer::new(MockConnection::opened());
    let conn = m.connection().unwrap();
    m.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
    m.dispose().await.unwrap();

    assert_eq!(conn.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn closed_connection_is_an_invalid_operation() {
    let m = Materializer::new(MockConnection::closed());
    assert_eq!(m.state().unwrap(), ConnectionState::Closed);

    assert!(m.execute("SELECT 1", ()).await.unwrap_err().is_invalid_operation());
    assert!(m
        .begin_transaction(IsolationLevel::default())
        .await
        .unwrap_err()
        .is_invalid_operation());

    m.open().await.unwrap();
    assert_eq!(m.state().unwrap(), ConnectionState::Open);
    assert_eq!(m.execute("SELECT 1", ()).await.unwrap(), 1);
}

#[tokio::test]
async fn close_rolls_back_active_transaction() {
    let m = Materializer::new(MockConnection::opened());
    m.begin_transaction(IsolationLevel::default()).await.unwrap();
    m.close().await.unwrap();

    let conn = m.connection().unwrap();
    assert_eq!(conn.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert!(m.transaction().is_none());
    assert_eq!(m.state().unwrap(), ConnectionState::Closed);
}

#[tokio::test]
async fn set_connection_requires_no_transaction() {
    let m = Materializer::new(MockConnection::opened());
    m.begin_transaction(IsolationLevel::default()).await.unwrap();
    assert!(m
        .set_connection(MockConnection::opened())
        .unwrap_err()
        .is_invalid_operation());

    m.rollback().await.unwrap();
    m.set_connection(MockConnection::closed()).unwrap();
    assert_eq!(m.state().unwrap(), ConnectionState::Closed);
    assert_eq!(m.connection_string().unwrap(), "mock://test");
}

// ── transactions ────────────────────────────────────────────────────────

#[tokio::test]
async fn transaction_lifecycle() {
    let m = Materializer::new(MockConnection::opened());
    let tx = m.begin_transaction(IsolationLevel::Serializable).await.unwrap();
    assert_eq!(m.transaction(), Some(tx.clone()));

    let cmd = m
        .create_command("UPDATE t SET a = 1", CommandKind::Text, (), None)
        .unwrap();
    assert_eq!(cmd.transaction(), Some(&tx));
    m.execute_command(&cmd).await.unwrap();
    m.commit().await.unwrap();

    assert!(m.transaction().is_none());
    assert_eq!(
        m.connection().unwrap().statements(),
        vec![
            "BEGIN ISOLATION LEVEL SERIALIZABLE".to_string(),
            "UPDATE t SET a = 1".to_string(),
            "COMMIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn read_only_transaction() {
    let m = Materializer::new(MockConnection::opened());
    let tx = m
        .begin_read_only_transaction(IsolationLevel::RepeatableRead)
        .await
        .unwrap();
    assert!(tx.is_read_only());
    m.rollback().await.unwrap();
    assert_eq!(
        m.connection().unwrap().statements(),
        vec![
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY".to_string(),
            "ROLLBACK".to_string(),
        ]
    );
}

#[tokio::test]
async fn transaction_state_violations() {
    let m = Materializer::new(MockConnection::opened());
    assert!(m.commit().await.unwrap_err().is_invalid_operation());
    assert!(m.rollback().await.unwrap_err().is_invalid_operation());

    m.begin_transaction(IsolationLevel::default()).await.unwrap();
    assert!(m
        .begin_transaction(IsolationLevel::default())
        .await
        .unwrap_err()
        .is_invalid_operation());
}

#[tokio::test]
async fn command_must_match_active_transaction() {
    let m = Materializer::new(MockConnection::opened());

    // created outside, executed inside
    let outside = m.create_command("SELECT 1", CommandKind::Text, (), None).unwrap();
    let first = m.begin_transaction(IsolationLevel::default()).await.unwrap();
    assert!(m.execute_command(&outside).await.unwrap_err().is_invalid_operation());

    // created inside, executed after commit
    let inside = m.create_command("SELECT 2", CommandKind::Text, (), None).unwrap();
    m.commit().await.unwrap();
    assert!(m.execute_command(&inside).await.unwrap_err().is_invalid_operation());

    // explicitly attached to a stale transaction
    m.begin_transaction(IsolationLevel::default()).await.unwrap();
    let stale = m
        .create_command("SELECT 3", CommandKind::Text, (), Some(&first))
        .unwrap();
    assert!(m.execute_command(&stale).await.unwrap_err().is_invalid_operation());
}

#[tokio::test]
async fn save_points() {
    let m = Materializer::new(MockConnection::opened());
    assert!(m.save_point("sp1").await.unwrap_err().is_invalid_operation());

    m.begin_transaction(IsolationLevel::default()).await.unwrap();
    m.save_point("sp1").await.unwrap();
    m.rollback_to_save_point("sp1").await.unwrap();
    m.release_save_point("sp1").await.unwrap();
    assert!(matches!(
        m.save_point("bad name").await,
        Err(OrmError::InvalidArgument(_))
    ));

    let statements = m.connection().unwrap().statements();
    assert_eq!(
        &statements[1..],
        &[
            "SAVEPOINT sp1".to_string(),
            "ROLLBACK TO SAVEPOINT sp1".to_string(),
            "RELEASE SAVEPOINT sp1".to_string(),
        ]
    );
}

// ── command factory ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_command_binds_and_expands() {
    let m = Materializer::new(MockConnection::opened());
    let cmd = m
        .create_command(
            "SELECT * FROM users WHERE id IN (@ids) AND status = @status",
            CommandKind::Text,
            params! { ids: vec![10, 20], status: "active" },
            None,
        )
        .unwrap();

    assert_eq!(
        cmd.text(),
        "SELECT * FROM users WHERE id IN (@ids_0, @ids_1) AND status = @status"
    );
    assert_eq!(cmd.parameters().names(), vec!["@ids_0", "@ids_1", "@status"]);
    assert_eq!(cmd.timeout(), m.command_timeout());
}

#[tokio::test]
async fn configured_prefix_and_timeout_are_applied() {
    let config = MaterializerConfig::new()
        .parameter_prefix(':')
        .command_timeout(Duration::from_secs(5))
        .unwrap();
    let m = Materializer::with_config(MockConnection::opened(), config).unwrap();
    let cmd = m
        .create_command(
            "SELECT * FROM t WHERE id = :id",
            CommandKind::Text,
            params! { id: 3 },
            None,
        )
        .unwrap();
    assert_eq!(cmd.prefix(), ':');
    assert_eq!(cmd.parameters()[0].name(), ":id");
    assert_eq!(cmd.timeout(), Duration::from_secs(5));
}

#[test]
fn zero_command_timeout_is_rejected() {
    let mut m = Materializer::new(MockConnection::opened());
    assert!(matches!(
        m.set_command_timeout(Duration::ZERO),
        Err(OrmError::InvalidArgument(_))
    ));
    m.set_command_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(m.command_timeout(), Duration::from_secs(1));
}

#[test]
fn zero_timeout_from_config_file_is_rejected() {
    let config: MaterializerConfig =
        serde_json::from_str(r#"{ "command_timeout": { "secs": 0, "nanos": 0 } }"#).unwrap();
    let err = Materializer::with_config(MockConnection::opened(), config.clone()).unwrap_err();
    assert!(matches!(err, OrmError::InvalidArgument(_)));

    let err = Materializer::from_arc(Arc::new(MockConnection::opened()), config).unwrap_err();
    assert!(matches!(err, OrmError::InvalidArgument(_)));
}

#[test]
fn procedure_command_is_validated() {
    let m = Materializer::new(MockConnection::opened());
    let bad = StoredProcedure::new("f(); DROP TABLE t");
    assert!(matches!(
        m.create_procedure_command(&bad, None),
        Err(OrmError::InvalidArgument(_))
    ));

    let cmd = m
        .create_procedure_command(&StoredProcedure::new("f").input("a", 1), None)
        .unwrap();
    assert_eq!(cmd.kind(), CommandKind::StoredProcedure);
    assert_eq!(cmd.parameters()[0].name(), "@a");
}

// ── execution ───────────────────────────────────────────────────────────

#[tokio::test]
async fn execute_sends_expanded_command() {
    let m = Materializer::new(MockConnection::opened());
    let affected = m
        .execute("DELETE FROM t WHERE id IN (@ids)", params! { ids: vec![1, 2] })
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(
        m.connection().unwrap().statements(),
        vec!["DELETE FROM t WHERE id IN (1, 2)".to_string()]
    );
}

#[tokio::test]
async fn query_as_maps_rows() {
    let m = Materializer::new(MockConnection::opened().returning(users()));
    let rows: Vec<(i64, String)> = m.query_as("SELECT id, username FROM users", ()).await.unwrap();
    assert_eq!(rows, vec![(1, "ann".to_string()), (2, "bob".to_string())]);
}

#[tokio::test]
async fn query_one_and_opt() {
    let m = Materializer::new(
        MockConnection::opened()
            .returning(users())
            .returning(DataTable::new(["id"])),
    );
    let first: (i64, String) = m.query_one_as("SELECT id, username FROM users", ()).await.unwrap();
    assert_eq!(first.0, 1);

    let none: Option<(i64,)> = m.query_opt_as("SELECT id FROM users", ()).await.unwrap();
    assert!(none.is_none());

    let err = m
        .query_one_as::<(i64,)>("SELECT id FROM users", ())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn execute_scalar_reads_first_cell() {
    let count = DataTable::new(["count"]).with_row(vec![Value::I64(42)]).unwrap();
    let m = Materializer::new(MockConnection::opened().returning(count));

    let n: i64 = m.execute_scalar("SELECT count(*) FROM users", ()).await.unwrap();
    assert_eq!(n, 42);

    let missing: Option<i64> = m
        .execute_scalar("SELECT id FROM users WHERE false", ())
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn execute_reader_is_forward_only() {
    let m = Materializer::new(MockConnection::opened().returning(users()));
    let mut reader = m.execute_reader("SELECT id, username FROM users", ()).await.unwrap();
    let mut names = Vec::new();
    while reader.read() {
        names.push(reader.get_string(1).unwrap());
    }
    assert_eq!(names, vec!["ann", "bob"]);
    assert!(matches!(reader.next_result(), Err(OrmError::NotSupported(_))));
}

#[tokio::test]
async fn execute_procedure_fills_outputs() {
    let result_row = DataTable::new(["balance"]).with_row(vec![Value::I64(90)]).unwrap();
    let m = Materializer::new(MockConnection::opened().returning(result_row));

    let proc = StoredProcedure::new("withdraw").input("amount", 10).output("balance");
    let result = m.execute_procedure(&proc).await.unwrap();

    assert_eq!(result.get::<i64>("balance").unwrap(), 90);
    assert_eq!(
        m.connection().unwrap().statements(),
        vec!["withdraw(amount => 10)".to_string()]
    );
}

#[tokio::test]
async fn query_procedure_as_maps_rows() {
    let m = Materializer::new(MockConnection::opened().returning(users()));
    let rows: Vec<(i64, String)> = m
        .query_procedure_as(&StoredProcedure::new("list_users"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn timeout_cancels_the_statement() {
    let mut m = Materializer::new(MockConnection::opened().with_delay(Duration::from_millis(500)));
    m.set_command_timeout(Duration::from_millis(20)).unwrap();

    let err = m.execute("SELECT pg_sleep(1)", ()).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, OrmError::Timeout(d) if d == Duration::from_millis(20)));

    let conn = m.connection().unwrap();
    assert_eq!(conn.cancels(), 1);
    assert!(conn.statements().is_empty());
}

/// Collects `(level, target)` of every event emitted while installed.
#[derive(Clone, Default)]
struct EventLevels(Arc<Mutex<Vec<(tracing::Level, String)>>>);

impl EventLevels {
    fn at(&self, level: tracing::Level, target: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, t)| *l == level && t == target)
            .count()
    }
}

impl tracing::Subscriber for EventLevels {
    fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
        tracing::span::Id::from_u64(1)
    }

    fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

    fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

    fn event(&self, event: &tracing::Event<'_>) {
        let meta = event.metadata();
        self.0
            .lock()
            .unwrap()
            .push((*meta.level(), meta.target().to_string()));
    }

    fn enter(&self, _: &tracing::span::Id) {}

    fn exit(&self, _: &tracing::span::Id) {}
}

#[tokio::test]
async fn interrupted_commands_log_at_warn() {
    let events = EventLevels::default();
    let _guard = tracing::subscriber::set_default(events.clone());

    let mut m = Materializer::new(MockConnection::opened().with_delay(Duration::from_millis(500)));
    m.set_command_timeout(Duration::from_millis(20)).unwrap();
    assert!(m.execute("SELECT pg_sleep(1)", ()).await.unwrap_err().is_timeout());
    assert_eq!(events.at(tracing::Level::WARN, "pgmat.sql"), 1);

    let err = m
        .query_cancellable(
            "SELECT pg_sleep(1)",
            (),
            tokio::time::sleep(Duration::from_millis(5)),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(events.at(tracing::Level::WARN, "pgmat.sql"), 2);
}

#[tokio::test]
async fn cancellation_is_reported_distinctly() {
    let m = Materializer::new(MockConnection::opened().with_delay(Duration::from_millis(500)));

    let err = m
        .query_cancellable(
            "SELECT pg_sleep(1)",
            (),
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(m.connection().unwrap().cancels(), 1);

    let err = m
        .execute_cancellable(
            "SELECT pg_sleep(1)",
            (),
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn query_one_strict_as_requires_exactly_one_row() {
    let one = DataTable::new(["id", "username"])
        .with_row(vec![Value::I64(7), Value::Text("eve".into())])
        .unwrap();
    let m = Materializer::new(
        MockConnection::opened()
            .returning(one)
            .returning(users())
            .returning(DataTable::new(["id", "username"])),
    );

    let row: (i64, String) = m.query_one_strict_as("SELECT 1", ()).await.unwrap();
    assert_eq!(row, (7, "eve".to_string()));

    let err = m
        .query_one_strict_as::<(i64, String)>("SELECT 2", ())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::TooManyRows { expected: 1, got: 2 }));

    let err = m
        .query_one_strict_as::<(i64, String)>("SELECT 3", ())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn cancellable_variants_complete_normally() {
    let count = DataTable::new(["n"]).with_row(vec![Value::I32(3)]).unwrap();
    let m = Materializer::new(MockConnection::opened().returning(count).returning(users()));

    let n: i32 = m
        .execute_scalar_cancellable("SELECT 3", (), std::future::pending())
        .await
        .unwrap();
    assert_eq!(n, 3);

    let rows: Vec<(i64, String)> = m
        .query_as_cancellable("SELECT id, username FROM users", (), std::future::pending())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(m.connection().unwrap().cancels(), 0);
}

#[test]
fn truncate_respects_char_boundaries() {
    assert_eq!(truncate_sql_bytes("SELECT 1", 100), "SELECT 1");
    assert_eq!(truncate_sql_bytes("SELECT 1", 6), "SELECT");
    assert_eq!(truncate_sql_bytes("héllo", 2), "h");
}
