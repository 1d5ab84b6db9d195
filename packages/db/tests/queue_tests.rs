mod common;

use std::error::Error;
use std::time::Duration;

use signer_core::{
    AckError, AuthSecret, DocumentLocation, EnqueueError, JobDescriptor, JobQueue, KeySlot,
};

use db::SurrealJobQueue;

fn descriptor(key: &str) -> JobDescriptor {
    JobDescriptor::new(
        DocumentLocation::new("incoming", key),
        KeySlot(0x9c),
        AuthSecret::new("123456"),
        "signed",
    )
}

#[tokio::test]
async fn enqueue_then_receive_returns_descriptor() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);

    let job = descriptor("contracts/a.pdf");
    let id = queue.enqueue(&job).await?;

    let messages = queue.receive(10, Duration::from_secs(30)).await?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_id(), &id);
    assert_eq!(messages[0].receive_count, 1);
    assert_eq!(messages[0].descriptor()?, job);
    Ok(())
}

#[tokio::test]
async fn received_message_is_invisible_until_timeout() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);
    queue.enqueue(&descriptor("a.pdf")).await?;

    let first = queue.receive(10, Duration::from_millis(150)).await?;
    assert_eq!(first.len(), 1);

    let hidden = queue.receive(10, Duration::from_millis(150)).await?;
    assert!(hidden.is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let redelivered = queue.receive(10, Duration::from_secs(30)).await?;
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].message_id(), first[0].message_id());
    assert_eq!(redelivered[0].receive_count, 2);
    assert_ne!(redelivered[0].receipt, first[0].receipt);
    Ok(())
}

#[tokio::test]
async fn receive_respects_batch_size() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);
    for i in 0..5 {
        queue.enqueue(&descriptor(&format!("doc-{i}.pdf"))).await?;
    }

    let batch = queue.receive(3, Duration::from_secs(30)).await?;
    assert_eq!(batch.len(), 3);
    let rest = queue.receive(10, Duration::from_secs(30)).await?;
    assert_eq!(rest.len(), 2);

    assert!(queue.receive(0, Duration::from_secs(30)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn acknowledge_removes_message() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);
    queue.enqueue(&descriptor("a.pdf")).await?;
    assert_eq!(queue.len().await?, 1);

    let messages = queue.receive(1, Duration::from_millis(100)).await?;
    queue.acknowledge(&messages[0].receipt).await?;

    assert!(queue.is_empty().await?);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(queue.receive(10, Duration::from_secs(30)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn acknowledge_with_superseded_receipt_is_stale() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);
    queue.enqueue(&descriptor("a.pdf")).await?;

    let first = queue.receive(1, Duration::from_millis(100)).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = queue.receive(1, Duration::from_secs(30)).await?;

    let result = queue.acknowledge(&first[0].receipt).await;
    assert!(matches!(result, Err(AckError::StaleReceipt(_))));

    // The current holder can still acknowledge.
    queue.acknowledge(&second[0].receipt).await?;
    assert!(queue.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn acknowledge_after_timeout_is_stale() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);
    queue.enqueue(&descriptor("a.pdf")).await?;

    let messages = queue.receive(1, Duration::from_millis(100)).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = queue.acknowledge(&messages[0].receipt).await;
    assert!(matches!(result, Err(AckError::StaleReceipt(_))));
    assert_eq!(queue.len().await?, 1);
    Ok(())
}

#[tokio::test]
async fn oversized_payload_is_rejected() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?).with_max_message_bytes(64);

    let result = queue.enqueue(&descriptor(&"x".repeat(100))).await;
    assert!(matches!(result, Err(EnqueueError::PayloadTooLarge { limit: 64, .. })));
    assert!(queue.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn raw_bodies_are_delivered_verbatim() -> Result<(), Box<dyn Error>> {
    let queue = SurrealJobQueue::new(common::setup_db().await?);
    queue.enqueue_body("not json".to_string()).await?;

    let messages = queue.receive(1, Duration::from_secs(30)).await?;
    assert_eq!(messages[0].body, "not json");
    assert!(messages[0].descriptor().is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_split_the_batch() -> Result<(), Box<dyn Error>> {
    for _ in 0..10 {
        let db = common::setup_db().await?;
        let producer = SurrealJobQueue::new(db.clone());
        for i in 0..8 {
            producer.enqueue(&descriptor(&format!("doc-{i}.pdf"))).await?;
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = SurrealJobQueue::new(db.clone());
                tokio::spawn(async move { queue.receive(8, Duration::from_secs(30)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for consumer in consumers {
            let delivered = consumer.await??;
            ids.extend(delivered.into_iter().map(|m| m.receipt.message_id.to_string()));
        }

        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total, "a message was delivered twice");
        assert_eq!(total, 8);
    }
    Ok(())
}
