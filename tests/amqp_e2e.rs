//! Broker integration tests.
//!
//! Run with: AMQP_URL=amqp://localhost:5672 cargo test --test amqp_e2e -- --ignored

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use pinbus::{AppNode, Config, Endpoint, LinkState, NodeError, SendOptions};

fn amqp_url() -> String {
    std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672/%2f".to_string())
}

fn broker_config(endpoint_id: &str) -> Config {
    let mut config = Config::default();
    config.endpoint_id = endpoint_id.to_string();
    config.amqp.url = amqp_url();
    config.amqp.reconnect_delay_secs = 1;
    config.http.enabled = false;
    config
}

async fn wait_consuming(endpoint: &Endpoint) {
    let mut state = endpoint.watch_state();
    tokio::time::timeout(Duration::from_secs(10), async {
        state.wait_for(|s| *s == LinkState::Consuming).await.unwrap();
    })
    .await
    .expect("endpoint should reach Consuming");
}

#[tokio::test]
#[ignore = "Requires RabbitMQ"]
async fn test_send_dispatch_reply_loop() {
    let a_id = format!("it-a-{}", Uuid::new_v4());
    let b_id = format!("it-b-{}", Uuid::new_v4());

    // Endpoint B echoes requests back to their reply address.
    let b = Endpoint::new(broker_config(&b_id));
    b.register_node(
        "demo",
        Arc::new(AppNode::new().app("echo", |_ctx, message| async move { Ok(message) })),
    )
    .unwrap();
    b.register_outbound(&a_id);

    // Endpoint A collects replies.
    let (tx, mut rx) = mpsc::channel::<Value>(8);
    let a = Endpoint::new(broker_config(&a_id));
    a.register_node(
        "demo",
        Arc::new(AppNode::new().app("on_echo", move |_ctx, message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message.clone()).await;
                Ok(message)
            }
        })),
    )
    .unwrap();
    a.register_outbound(&b_id);

    b.run().await.unwrap();
    a.run().await.unwrap();
    wait_consuming(&b).await;
    wait_consuming(&a).await;

    let correlation = a
        .send(
            &format!("pin://{b_id}/demo/echo"),
            json!({"x": 1}),
            SendOptions {
                reply_to: Some(format!("pin://{a_id}/demo/on_echo")),
                ..SendOptions::default()
            },
        )
        .unwrap();
    assert!(correlation.is_some());

    let reply = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("reply should arrive")
        .unwrap();
    assert_eq!(reply["x"], json!(1));

    assert!(a.stats().published >= 1);

    a.stop().await;
    b.stop().await;
    assert_eq!(a.state(), LinkState::Disconnected);
    assert_eq!(b.state(), LinkState::Disconnected);
}

#[tokio::test]
#[ignore = "Requires RabbitMQ"]
async fn test_failing_handler_is_acked_without_redelivery() {
    let a_id = format!("it-a-{}", Uuid::new_v4());
    let b_id = format!("it-b-{}", Uuid::new_v4());

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let b = Endpoint::new(broker_config(&b_id));
    b.register_node(
        "demo",
        Arc::new(AppNode::new().app("boom", move |_ctx, _message| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(NodeError::AppFailed("boom".to_string()))
            }
        })),
    )
    .unwrap();
    b.register_outbound(&a_id);

    let (tx, mut rx) = mpsc::channel::<Value>(8);
    let a = Endpoint::new(broker_config(&a_id));
    a.register_node(
        "demo",
        Arc::new(AppNode::new().app("on_error", move |_ctx, message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message.clone()).await;
                Ok(message)
            }
        })),
    )
    .unwrap();
    a.register_outbound(&b_id);

    b.run().await.unwrap();
    a.run().await.unwrap();
    wait_consuming(&b).await;
    wait_consuming(&a).await;

    a.send(
        &format!("pin://{b_id}/demo/boom"),
        json!({}),
        SendOptions {
            error_to: Some(format!("pin://{a_id}/demo/on_error")),
            ..SendOptions::default()
        },
    )
    .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("error report should arrive")
        .unwrap();
    assert!(report["error"].as_str().unwrap().contains("boom"));

    // The failed delivery was acked: no redelivery loop.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    a.stop().await;
    b.stop().await;
}
