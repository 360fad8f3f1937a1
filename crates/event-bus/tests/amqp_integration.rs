//! RabbitMQ integration tests
//!
//! These tests use a shared RabbitMQ container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p event-bus --test amqp_integration -- --ignored
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use event_bus::{
    AmqpConnector, AmqpEventBus, BusHandle, Connector, Delivery, EventBus, EventBusExt,
    HandlerError, MAX_HANDLER_ATTEMPTS, MessageHandler, Subscription,
};
use lapin::options::{BasicGetOptions, QueueDeleteOptions};
use lapin::{Connection, ConnectionProperties};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::rabbitmq::RabbitMq;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<RabbitMq>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = RabbitMq::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5672).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("amqp://guest:guest@{}:{}/%2f", host, port),
            })
        })
        .await
        .clone()
}

async fn connect(name: &str) -> AmqpEventBus {
    let info = get_container_info().await;
    AmqpEventBus::connect(&info.url, name).await.unwrap()
}

#[derive(Default)]
struct Recorder {
    keys: Mutex<Vec<String>>,
    failure_counts: Mutex<Vec<u32>>,
    failures_left: AtomicUsize,
}

impl Recorder {
    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        self.failure_counts.lock().unwrap().push(delivery.handler_failures);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(HandlerError::new("not yet"));
        }
        self.keys.lock().unwrap().push(delivery.routing_key.clone());
        Ok(())
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_routes_by_pattern() {
    let bus = connect("routing-test").await;
    let recorder = Arc::new(Recorder::default());

    bus.subscribe(
        Subscription::new("it_product_events", "product.*").unwrap(),
        recorder.clone(),
    )
    .await
    .unwrap();

    for key in ["product.deleted", "product.price.changed", "product.updated"] {
        bus.publish_json("it_product_events", key, &serde_json::json!({"id": 1}))
            .await
            .unwrap();
    }

    wait_for(|| recorder.keys().len() == 2).await;
    assert_eq!(recorder.keys(), vec!["product.deleted", "product.updated"]);

    bus.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_failed_message_is_retried_with_its_failure_count() {
    let bus = connect("redelivery-test").await;
    let recorder = Arc::new(Recorder::failing(1));

    bus.subscribe(
        Subscription::new("it_user_events", "user.#").unwrap(),
        recorder.clone(),
    )
    .await
    .unwrap();

    bus.publish_json("it_user_events", "user.deleted", &serde_json::json!({"id": 7}))
        .await
        .unwrap();

    wait_for(|| recorder.keys().len() == 1).await;
    assert_eq!(*recorder.failure_counts.lock().unwrap(), vec![0, 1]);

    bus.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_poison_message_lands_in_dead_letter_queue() {
    let group = "it-orders-poison";
    let bus = connect("dead-letter-test").await;
    let recorder = Arc::new(Recorder::failing(usize::MAX));

    bus.subscribe(
        Subscription::shared("it_poison_events", "user.#", group).unwrap(),
        recorder.clone(),
    )
    .await
    .unwrap();
    bus.publish_json("it_poison_events", "user.deleted", &serde_json::json!({"id": 9}))
        .await
        .unwrap();

    let attempts = MAX_HANDLER_ATTEMPTS as usize;
    wait_for(|| recorder.failure_counts.lock().unwrap().len() == attempts).await;
    assert!(recorder.keys().is_empty());

    let info = get_container_info().await;
    let inspector = Connection::connect(&info.url, ConnectionProperties::default())
        .await
        .unwrap();
    let channel = inspector.create_channel().await.unwrap();

    let dead_letter = format!("{group}.dead-letter");
    let mut kept = None;
    for _ in 0..100 {
        kept = channel
            .basic_get(&dead_letter, BasicGetOptions { no_ack: true })
            .await
            .unwrap();
        if kept.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let kept = kept.expect("dead-lettered message not kept");
    assert_eq!(kept.delivery.routing_key.as_str(), "user.deleted");

    inspector.close(200, "done").await.unwrap();
    bus.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_shared_queue_survives_reconnect() {
    let group = "it-orders-inventory-events";
    let first = connect("durable-test-1").await;
    first
        .subscribe(
            Subscription::shared("it_inventory_events", "inventory.*", group).unwrap(),
            Arc::new(Recorder::default()),
        )
        .await
        .unwrap();
    first.close().await.unwrap();

    let publisher = connect("durable-test-publisher").await;
    publisher
        .publish_json(
            "it_inventory_events",
            "inventory.reserved",
            &serde_json::json!({"orderId": 1, "productId": 1, "quantity": 2}),
        )
        .await
        .unwrap();

    let second = connect("durable-test-2").await;
    let recorder = Arc::new(Recorder::default());
    second
        .subscribe(
            Subscription::shared("it_inventory_events", "inventory.*", group).unwrap(),
            recorder.clone(),
        )
        .await
        .unwrap();

    wait_for(|| recorder.keys() == vec!["inventory.reserved"]).await;

    publisher.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_lost_consumer_reports_connection_closed() {
    let group = "it-orders-vanishing";
    let bus = connect("lost-consumer-test").await;
    bus.subscribe(
        Subscription::shared("it_vanishing_events", "user.#", group).unwrap(),
        Arc::new(Recorder::default()),
    )
    .await
    .unwrap();
    assert!(bus.is_connected());

    // Deleting the queue cancels the consumer while the connection stays up.
    let info = get_container_info().await;
    let admin = Connection::connect(&info.url, ConnectionProperties::default())
        .await
        .unwrap();
    let channel = admin.create_channel().await.unwrap();
    channel
        .queue_delete(group, QueueDeleteOptions::default())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), bus.closed())
        .await
        .expect("closed() did not resolve");
    assert!(!bus.is_connected());

    admin.close(200, "done").await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_connector_feeds_bus_handle() {
    let info = get_container_info().await;
    let connector = AmqpConnector::new(info.url.clone(), "handle-test");
    assert!(!connector.describe().contains("guest:guest"));

    let bus = connector.connect().await.unwrap();
    bus.declare_exchange("it_order_events").await.unwrap();

    let handle = BusHandle::new();
    let generation = handle.install(bus.clone());
    handle
        .publish_json("it_order_events", "order.created", &serde_json::json!({"id": 1}))
        .await
        .unwrap();

    bus.close().await.unwrap();
    assert!(!handle.is_connected());
    handle.clear(generation);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_closed_resolves_after_close() {
    let bus = connect("close-test").await;
    assert!(bus.is_connected());

    bus.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), bus.closed())
        .await
        .expect("closed() did not resolve");
    assert!(!bus.is_connected());
}
