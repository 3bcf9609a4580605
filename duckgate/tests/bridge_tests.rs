//! Request/response correlation and lifecycle of the execution context

mod testutils;

use duckgate::bridge::{Message, Reply};
use duckgate::{
    Bridge, Config, Credentials, Error, MemoryEngineFactory, QueryRequest, QueryService,
    ScriptedResult,
};
use std::sync::Arc;
use std::time::Duration;
use testutils::test_fixture::{scripted_engine, TestFixture, GREETING_SQL, SLOW_SQL};

const DELAYED_SQL: &str = "SELECT count(*) AS trips FROM delayed";

fn delayed_engine(delay: Duration) -> MemoryEngineFactory {
    scripted_engine().with_delay(
        DELAYED_SQL,
        delay,
        ScriptedResult::new([("trips", "BIGINT")]).row([42i64]),
    )
}

#[tokio::test]
async fn test_responses_are_matched_out_of_order() {
    let bridge = Arc::new(Bridge::new(
        Arc::new(delayed_engine(Duration::from_millis(200))),
        Config::relayed(),
    ));
    bridge.initialize(Credentials::in_memory()).await.unwrap();

    let slow = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send(Message::Query(QueryRequest::new(DELAYED_SQL))).await })
    };

    // Later requests are answered while the query is still outstanding
    let mut saw_running = false;
    for _ in 0..20 {
        match bridge.send(Message::Status).await.unwrap() {
            Reply::Status(status) => saw_running |= status.is_running,
            other => panic!("status answered with {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(saw_running);
    assert!(!slow.is_finished());

    let Reply::Query(handle) = slow.await.unwrap().unwrap() else {
        panic!("query answered with the wrong reply");
    };
    assert_eq!(handle.schema[0].name, "trips");

    let Reply::Batch(Some(rows)) = bridge.send(Message::Fetch { cursor: handle.cursor }).await.unwrap()
    else {
        panic!("fetch answered with the wrong reply");
    };
    assert_eq!(rows[0].get("trips").and_then(|v| v.as_i64()), Some(42));
    bridge.terminate().await;
}

#[tokio::test]
async fn test_request_timeout_surfaces_bridge_timeout() {
    let factory = delayed_engine(Duration::from_millis(150));
    let config = Config::relayed().with_request_timeout(Duration::from_millis(30));
    let fixture = TestFixture::with_factory(factory, config);
    fixture.initialize().await;

    let err = fixture.client().query(DELAYED_SQL).await.err().unwrap();
    assert_eq!(err, Error::BridgeTimeout(Duration::from_millis(30)));

    // The context keeps running the query; wait for it to settle
    for _ in 0..100 {
        if !fixture.client().status().await.unwrap().is_running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fixture.query_rows(GREETING_SQL).await.unwrap().len(), 1);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_requests() {
    let fixture = TestFixture::relayed();
    fixture.initialize().await;
    let running = fixture.start_in_background(SLOW_SQL).await;

    fixture.client().shutdown().await.unwrap();
    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::EngineExecution(_)), "{:?}", err);
    assert_eq!(fixture.recorder().interrupt_count(), 1);
}

#[tokio::test]
async fn test_client_restarts_context_after_shutdown() {
    let fixture = TestFixture::relayed();
    fixture.initialize().await;
    fixture.client().shutdown().await.unwrap();
    assert_eq!(fixture.recorder().close_count(), 1);

    // A new context hosts a fresh, uninitialized session
    let err = fixture.query_rows(GREETING_SQL).await.unwrap_err();
    assert_eq!(err, Error::NotInitialized);

    fixture.initialize().await;
    assert_eq!(fixture.query_rows(GREETING_SQL).await.unwrap().len(), 1);
    assert_eq!(fixture.recorder().connect_count(), 2);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_close_without_context_does_not_start_one() {
    let factory = MemoryEngineFactory::new();
    let bridge = Bridge::new(Arc::new(factory.clone()), Config::relayed());

    bridge.close().await.unwrap();
    assert!(!bridge.is_running());
    assert_eq!(factory.recorder().connect_count(), 0);
}

#[tokio::test]
async fn test_envelopes_serialize_with_type_and_payload() {
    let json = serde_json::to_value(duckgate::bridge::Envelope {
        id: 7,
        message: Message::Cancel {
            timeout_ms: Some(250),
        },
    })
    .unwrap();
    assert_eq!(
        json,
        serde_json::json!({"id": 7, "message": {"type": "cancel", "payload": {"timeoutMs": 250}}})
    );
}
