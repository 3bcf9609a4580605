//! Test fixture for duckgate integration tests
//!
//! Wires a `Client` to a scripted `MemoryEngineFactory` and keeps the engine
//! recorder around so tests can check what actually reached the engine. Uses
//! only the public duckgate API.

use duckgate::{
    Client, Config, Credentials, EngineRecorder, ExecutionStrategy, MemoryEngineFactory, Row,
    ScriptedResult, Value,
};
use std::sync::Arc;
use std::time::Duration;

pub const GREETING_SQL: &str = "SELECT 'Hello' AS greeting";
pub const NUMBERS_SQL: &str = "SELECT n FROM range(10) t(n)";
pub const SLOW_SQL: &str = "SELECT * FROM slow_scan";
pub const FAILING_SQL: &str = "SELECT * FROM missing_table";
pub const FAILING_MESSAGE: &str =
    "Catalog Error: Table with name missing_table does not exist!";

pub const ALL_STRATEGIES: [ExecutionStrategy; 3] = [
    ExecutionStrategy::DirectBinding,
    ExecutionStrategy::PreparedStatement,
    ExecutionStrategy::RelayedThroughBridge,
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scripted engine answering the standard fixture statements
pub fn scripted_engine() -> MemoryEngineFactory {
    MemoryEngineFactory::new()
        .with_result(
            GREETING_SQL,
            ScriptedResult::new([("greeting", "VARCHAR")]).row(["Hello"]),
        )
        .with_result(
            NUMBERS_SQL,
            ScriptedResult::new([("n", "BIGINT")])
                .rows((0..10).map(|n| vec![Value::Integer(n)]))
                .streamed_in_chunks_of(3),
        )
        .with_blocking(SLOW_SQL)
        .with_failure(FAILING_SQL, FAILING_MESSAGE)
}

/// Client plus the recorder of the engine behind it
pub struct TestFixture {
    client: Arc<Client>,
    recorder: EngineRecorder,
}

impl TestFixture {
    /// Fixture over the standard scripted engine
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self::with_factory(scripted_engine(), Config::default().with_strategy(strategy))
    }

    pub fn relayed() -> Self {
        Self::new(ExecutionStrategy::RelayedThroughBridge)
    }

    pub fn in_process() -> Self {
        Self::new(ExecutionStrategy::DirectBinding)
    }

    pub fn with_factory(factory: MemoryEngineFactory, config: Config) -> Self {
        init_logging();
        let recorder = factory.recorder();
        let client = Client::new(Arc::new(factory), config).expect("valid fixture config");
        Self {
            client: Arc::new(client),
            recorder,
        }
    }

    /// Create and initialize against an in-memory database
    pub async fn initialized(strategy: ExecutionStrategy) -> Self {
        let fixture = Self::new(strategy);
        fixture.initialize().await;
        fixture
    }

    pub async fn initialize(&self) {
        self.client
            .initialize(Credentials::in_memory())
            .await
            .expect("fixture initialize");
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn recorder(&self) -> &EngineRecorder {
        &self.recorder
    }

    /// Run a query and collect every row
    pub async fn query_rows(&self, sql: &str) -> duckgate::Result<Vec<Row>> {
        self.client.query(sql).await?.collect_rows().await
    }

    /// Start `sql` in the background and wait until it is running
    pub async fn start_in_background(
        &self,
        sql: &str,
    ) -> tokio::task::JoinHandle<duckgate::Result<Vec<Row>>> {
        let client = self.client.clone();
        let sql = sql.to_string();
        let handle =
            tokio::spawn(async move { client.query(&sql).await?.collect_rows().await });
        self.wait_until_running().await;
        handle
    }

    /// Poll status until a query is running
    pub async fn wait_until_running(&self) {
        for _ in 0..400 {
            if self.client.status().await.expect("status").is_running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("query never reached the running state");
    }

    /// Poll until the engine has torn down `expected` connections
    pub async fn wait_for_closes(&self, expected: usize) {
        for _ in 0..400 {
            if self.recorder.close_count() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await.expect("shutdown");
    }
}
