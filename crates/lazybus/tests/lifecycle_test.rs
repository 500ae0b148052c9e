//! Backpressure, late registration, consumer replacement and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use lazybus::{BoxError, Bus, BusError, Handler, MessageStream, Producer};

const TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(100);

async fn accept(_id: Uuid, _message: MessageStream) -> Result<(), BoxError> {
    Ok(())
}

/// Handler that tags each delivery with a fixed label.
struct Labelled {
    label: &'static str,
    tx: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl Handler for Labelled {
    async fn handle(&self, _id: Uuid, _message: MessageStream) -> Result<(), BoxError> {
        self.tx.send(self.label)?;
        Ok(())
    }
}

async fn wait_for_delivered(bus: &Bus, topic: &str, expected: u64) {
    timeout(TIMEOUT, async {
        while bus.topic_stats(topic).map_or(0, |s| s.delivered) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deliveries did not arrive in time");
}

#[tokio::test]
async fn full_queue_blocks_publisher_without_dropping() {
    let bus = Arc::new(Bus::builder().max_message(2).worker_pool(1).build());
    bus.register_consumer("a", accept).unwrap();

    // No listen yet: nothing drains the queue.
    bus.publish("a", Producer::string("0")).await.unwrap();
    bus.publish("a", Producer::string("1")).await.unwrap();
    assert_eq!(bus.queue_length("a"), 2);

    let blocked = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.publish("a", Producer::string("2")).await })
    };
    tokio::time::sleep(SETTLE).await;
    assert!(!blocked.is_finished(), "publish must wait for space");
    assert_eq!(bus.queue_length("a"), 2);

    bus.listen().unwrap();
    timeout(TIMEOUT, blocked)
        .await
        .expect("publish should complete once space frees")
        .unwrap()
        .unwrap();

    wait_for_delivered(&bus, "a", 3).await;
    assert_eq!(bus.topic_stats("a").unwrap().published, 3);

    bus.shutdown_and_join().await;
}

#[tokio::test]
async fn full_queue_does_not_block_other_topics() {
    let bus = Arc::new(Bus::builder().max_message(1).worker_pool(1).build());
    bus.register_consumer("stuck", accept).unwrap();
    bus.publish("stuck", Producer::string("fills the queue"))
        .await
        .unwrap();

    let blocked = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.publish("stuck", Producer::string("waits")).await })
    };
    tokio::time::sleep(SETTLE).await;
    assert!(!blocked.is_finished());

    // Registry operations and other topics stay available.
    timeout(TIMEOUT, async {
        bus.register_consumer("free", accept).unwrap();
        bus.publish("free", Producer::string("x")).await.unwrap();
    })
    .await
    .expect("other topics must not wait on a full queue");
    assert_eq!(bus.queue_length("free"), 1);

    bus.shutdown();
    let result = timeout(TIMEOUT, blocked).await.expect("timed out").unwrap();
    assert!(matches!(result, Err(BusError::ShutDown)));
}

#[tokio::test]
async fn registration_after_listen_starts_dispatch() {
    let bus = Bus::builder().worker_pool(2).build();
    bus.listen().unwrap();
    assert!(bus.is_listening());
    assert_eq!(bus.worker_count(), 0);

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.register_handler("late", Labelled { label: "late", tx })
        .unwrap();
    assert_eq!(bus.worker_count(), 2);

    bus.publish("late", Producer::string("hello")).await.unwrap();
    let label = timeout(TIMEOUT, rx.recv()).await.expect("timed out").unwrap();
    assert_eq!(label, "late");

    bus.shutdown_and_join().await;
}

#[tokio::test]
async fn registration_from_plain_thread_after_listen() {
    let bus = Arc::new(Bus::builder().worker_pool(2).build());
    bus.listen().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let registering = bus.clone();
    std::thread::spawn(move || {
        registering.register_handler("late", Labelled { label: "late", tx })
    })
    .join()
    .expect("registration outside the runtime must not panic")
    .unwrap();
    assert_eq!(bus.worker_count(), 2);

    bus.publish("late", Producer::string("hello")).await.unwrap();
    let label = timeout(TIMEOUT, rx.recv()).await.expect("timed out").unwrap();
    assert_eq!(label, "late");

    bus.shutdown_and_join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registrations_racing_shutdown_leave_no_stray_workers() {
    let bus = Arc::new(Bus::builder().worker_pool(1).build());
    bus.listen().unwrap();

    let registering = bus.clone();
    let registrar = std::thread::spawn(move || {
        let mut registered = 0usize;
        while registering
            .register_consumer(format!("t{registered}"), accept)
            .is_ok()
        {
            registered += 1;
        }
        registered
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    timeout(TIMEOUT, bus.shutdown_and_join())
        .await
        .expect("workers should stop");
    let registered = registrar.join().unwrap();

    assert!(registered > 0);
    // Every spawned worker was collected by the join above.
    assert_eq!(bus.worker_count(), 0);
}

#[tokio::test]
async fn panicking_consumer_does_not_stall_the_topic() {
    let (drop_tx, mut drop_rx) = mpsc::unbounded_channel();
    let bus = Bus::builder()
        .max_message(1)
        .worker_pool(1)
        .on_failure(move |dropped| {
            let _ = drop_tx.send(dropped.reason.kind());
        })
        .build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.register_consumer("a", move |_, mut message| {
        let tx = tx.clone();
        async move {
            let mut body = String::new();
            std::io::Read::read_to_string(&mut message, &mut body)?;
            if body == "boom" {
                panic!("cannot handle {body}");
            }
            tx.send(body)?;
            Ok::<(), BoxError>(())
        }
    })
    .unwrap();
    bus.listen().unwrap();

    bus.publish("a", Producer::string("boom")).await.unwrap();
    for body in ["after", "and again"] {
        bus.publish("a", Producer::string(body)).await.unwrap();
        let got = timeout(TIMEOUT, rx.recv()).await.expect("timed out").unwrap();
        assert_eq!(got, body);
    }

    assert_eq!(drop_rx.recv().await, Some("handler_panicked"));
    let stats = bus.topic_stats("a").unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.handler_failures, 1);
    assert_eq!(bus.worker_count(), 1);

    bus.shutdown_and_join().await;
}

#[tokio::test]
async fn replaced_consumer_handles_subsequent_messages() {
    let bus = Bus::builder().worker_pool(3).build();
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.register_handler(
        "a",
        Labelled {
            label: "old",
            tx: tx.clone(),
        },
    )
    .unwrap();
    bus.listen().unwrap();

    bus.publish("a", Producer::string("1")).await.unwrap();
    assert_eq!(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap(), "old");

    bus.register_handler("a", Labelled { label: "new", tx })
        .unwrap();
    for _ in 0..5 {
        bus.publish("a", Producer::string("2")).await.unwrap();
    }
    for _ in 0..5 {
        assert_eq!(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap(), "new");
    }

    bus.shutdown_and_join().await;
}

#[tokio::test]
async fn shutdown_stops_workers_and_discards_queue() {
    let handled = Arc::new(AtomicUsize::new(0));
    let bus = Bus::builder().max_message(10).worker_pool(4).build();

    let counter = handled.clone();
    bus.register_consumer("a", move |_, _| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    })
    .unwrap();
    bus.listen().unwrap();
    bus.publish("a", Producer::string("before")).await.unwrap();
    wait_for_delivered(&bus, "a", 1).await;

    timeout(TIMEOUT, bus.shutdown_and_join())
        .await
        .expect("workers should stop");
    assert_eq!(bus.worker_count(), 0);

    let err = bus.publish("a", Producer::string("after")).await.unwrap_err();
    assert!(matches!(err, BusError::ShutDown));
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_the_bus_stops_workers() {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let bus = Bus::builder().worker_pool(2).build();
    bus.register_consumer("a", move |_, _| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    })
    .unwrap();
    bus.listen().unwrap();
    bus.publish("a", Producer::string("x")).await.unwrap();
    wait_for_delivered(&bus, "a", 1).await;

    drop(bus);
    tokio::time::sleep(SETTLE).await;

    // The consumer closure (and its counter clone) is released with the workers.
    timeout(TIMEOUT, async {
        while Arc::strong_count(&handled) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers kept the consumer alive after drop");
}
