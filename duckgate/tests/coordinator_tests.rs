//! Single-flight execution and cancellation across every execution strategy

mod testutils;

use duckgate::{
    CancelOutcome, Client, Config, Credentials, Error, ExecutionStrategy, MemoryEngineFactory,
    ScriptedResult,
};
use std::sync::Arc;
use std::time::Duration;
use testutils::test_fixture::{
    TestFixture, ALL_STRATEGIES, FAILING_MESSAGE, FAILING_SQL, GREETING_SQL, SLOW_SQL,
};

#[tokio::test]
async fn test_second_query_is_rejected_while_one_runs() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;
        let running = fixture.start_in_background(SLOW_SQL).await;

        let err = fixture
            .client()
            .query(GREETING_SQL)
            .await
            .err()
            .expect("second query must be rejected");
        assert!(matches!(err, Error::AlreadyRunning), "{:?}: {:?}", strategy, err);
        assert_eq!(fixture.recorder().executions_of(GREETING_SQL), 0);

        fixture.client().cancel().await.unwrap();
        assert!(running.await.unwrap().is_err());

        let rows = fixture.query_rows(GREETING_SQL).await.unwrap();
        assert_eq!(rows.len(), 1, "{:?}", strategy);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_state_returns_to_idle_after_failure() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;

        let err = fixture.query_rows(FAILING_SQL).await.unwrap_err();
        assert_eq!(err, Error::EngineExecution(FAILING_MESSAGE.to_string()));

        let status = fixture.client().status().await.unwrap();
        assert!(!status.is_running);
        assert!(!status.is_cancelling);

        let rows = fixture.query_rows(GREETING_SQL).await.unwrap();
        assert_eq!(rows[0].get("greeting").and_then(|v| v.as_str()), Some("Hello"));
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_status_reports_running_query() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;
        let running = fixture.start_in_background(SLOW_SQL).await;

        let status = fixture.client().status().await.unwrap();
        assert!(status.is_running);
        assert!(!status.is_cancelling);

        fixture.client().cancel().await.unwrap();
        running.await.unwrap().unwrap_err();
        assert!(!fixture.client().status().await.unwrap().is_running);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_query_before_initialize_fails() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::new(strategy);
        let err = fixture.query_rows(GREETING_SQL).await.unwrap_err();
        assert_eq!(err, Error::NotInitialized, "{:?}", strategy);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_cancel_when_idle_is_a_no_op() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;
        let outcome = fixture.client().cancel().await.unwrap();
        assert_eq!(outcome, CancelOutcome::NotRunning);
        assert_eq!(fixture.recorder().interrupt_count(), 0);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_cancel_before_initialize_fails() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::new(strategy);
        let err = fixture.client().cancel().await.unwrap_err();
        assert_eq!(err, Error::NotInitialized, "{:?}", strategy);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_concurrent_cancels_interrupt_once() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;
        let running = fixture.start_in_background(SLOW_SQL).await;

        let client = fixture.client();
        let (first, second) = tokio::join!(client.cancel(), client.cancel());
        let outcomes = [first.unwrap(), second.unwrap()];

        let acknowledged = outcomes
            .iter()
            .filter(|o| **o == CancelOutcome::Acknowledged)
            .count();
        assert_eq!(acknowledged, 1, "{:?}: {:?}", strategy, outcomes);
        assert_eq!(fixture.recorder().interrupt_count(), 1);

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::EngineExecution(_)), "{:?}", err);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_cancel_deadline_forces_idle() {
    let factory = MemoryEngineFactory::new()
        .with_delay(
            "SELECT * FROM stubborn",
            Duration::from_millis(400),
            ScriptedResult::new([("x", "INTEGER")]).row([1i64]),
        )
        .with_result(GREETING_SQL, ScriptedResult::new([("greeting", "VARCHAR")]).row(["Hello"]))
        .ignoring_interrupts();
    let fixture = TestFixture::with_factory(factory, Config::in_process());
    fixture.initialize().await;
    let running = fixture.start_in_background("SELECT * FROM stubborn").await;

    let err = fixture
        .client()
        .cancel_with_timeout(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancellation(_)), "{:?}", err);
    assert!(!fixture.client().status().await.unwrap().is_running);

    // The late result of the abandoned query is discarded
    assert!(running.await.unwrap().is_err());
    assert_eq!(fixture.query_rows(GREETING_SQL).await.unwrap().len(), 1);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_close_while_running_resets_state() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;
        let running = fixture.start_in_background(SLOW_SQL).await;

        fixture.client().close().await.unwrap();
        assert!(running.await.unwrap().is_err());
        assert_eq!(fixture.recorder().interrupt_count(), 1);

        fixture.initialize().await;
        assert!(!fixture.client().status().await.unwrap().is_running);
        assert_eq!(fixture.query_rows(GREETING_SQL).await.unwrap().len(), 1);
        assert_eq!(fixture.recorder().connect_count(), 2);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    for strategy in ALL_STRATEGIES {
        let fixture = TestFixture::initialized(strategy).await;
        fixture.client().close().await.unwrap();
        fixture.client().close().await.unwrap();
        assert_eq!(fixture.recorder().close_count(), 1, "{:?}", strategy);
        fixture.shutdown().await;
    }
}

#[tokio::test]
async fn test_initialize_twice_fails() {
    let factory = MemoryEngineFactory::new();
    let recorder = factory.recorder();
    let client = Client::new(Arc::new(factory), Config::relayed()).unwrap();
    client.initialize(Credentials::in_memory()).await.unwrap();

    let err = client.initialize(Credentials::in_memory()).await.unwrap_err();
    assert!(matches!(err, Error::Initialization(_)), "{:?}", err);
    assert_eq!(recorder.connect_count(), 1);
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_surfaces_as_initialization_error() {
    for strategy in ALL_STRATEGIES {
        let factory = MemoryEngineFactory::new().with_connect_failure("IO Error: cannot open file");
        let client =
            Client::new(Arc::new(factory), Config::default().with_strategy(strategy)).unwrap();

        let err = client
            .initialize(Credentials::new("/nowhere/db.duckdb"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{:?}", err);
        assert_eq!(client.query(GREETING_SQL).await.err(), Some(Error::NotInitialized));
        client.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_prepared_strategy_routes_every_query_through_prepare() {
    let fixture = TestFixture::initialized(ExecutionStrategy::PreparedStatement).await;
    fixture.query_rows(GREETING_SQL).await.unwrap();

    let executed = fixture.recorder().executed();
    let greeting = executed.iter().find(|s| s.sql == GREETING_SQL).unwrap();
    assert!(greeting.prepared);
    fixture.shutdown().await;
}
