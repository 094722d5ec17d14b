//! Runs against a live broker; skipped unless `REDIS_HOST` is set.
#![cfg(feature = "redis")]

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use trade_queue::{
    now_millis, BrokerConfig, JobOptions, JobState, Queue, QueueBackend, QueueError, RedisBackend,
    STALLED_LIMIT_REASON,
};

/// Two backends for the same queue on a fresh key prefix, as two processes would see it
async fn shared_pair() -> Option<(Arc<RedisBackend>, Arc<RedisBackend>)> {
    shared_pair_on().await.map(|(first, second, _)| (first, second))
}

async fn shared_pair_on() -> Option<(Arc<RedisBackend>, Arc<RedisBackend>, BrokerConfig)> {
    if std::env::var("REDIS_HOST").is_err() {
        eprintln!("REDIS_HOST not set, skipping");
        return None;
    }

    let broker = BrokerConfig {
        key_prefix: format!("trade-test-{}", Uuid::new_v4()),
        ..BrokerConfig::from_env().ok()?
    };
    let first = RedisBackend::connect("test_slack_queue", &broker).await.ok()?;
    let second = RedisBackend::connect("test_slack_queue", &broker).await.ok()?;
    Some((Arc::new(first), Arc::new(second), broker))
}

#[tokio::test]
async fn test_due_job_is_promoted_and_fetched_once() {
    let Some((first, second)) = shared_pair().await else { return };
    let queue = Queue::new("test_slack_queue", first.clone());

    let job = queue.add("trade_announce", json!({ "trade": "{}" }), JobOptions::new(3)).await.unwrap();
    let now = now_millis();
    let fetched = first.fetch_next(now, 30_000).await.unwrap().unwrap();
    assert_eq!(fetched.id, job.id);
    first.fail(&job.id, "slack down".into(), Some(now), now).await.unwrap();

    let later = now + 1;
    let (a, b) = tokio::join!(first.promote_delayed(later), second.promote_delayed(later));
    let promoted = a.unwrap().len() + b.unwrap().len();
    assert_eq!(promoted, 1);

    let counts = first.job_counts().await.unwrap();
    assert_eq!(counts.waiting, 1);
    assert_eq!(counts.delayed, 0);

    let (a, b) = tokio::join!(first.fetch_next(later, 30_000), second.fetch_next(later, 30_000));
    let taken: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].attempts_made, 2);
    assert_eq!(first.job_counts().await.unwrap().active, 1);

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_stalled_job_is_requeued_once() {
    let Some((first, second)) = shared_pair().await else { return };

    let queue = Queue::new("test_slack_queue", first.clone());
    let job = queue.add("trade_announce", json!({ "trade": "{}" }), JobOptions::new(1)).await.unwrap();

    // 1ms lock that lapses before the check
    let now = now_millis();
    first.fetch_next(now, 1).await.unwrap().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let check_at = now_millis();
    let (a, b) = tokio::join!(first.check_stalled(check_at, 1), second.check_stalled(check_at, 1));
    let stalled: Vec<_> = a.unwrap().into_iter().chain(b.unwrap()).collect();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].state, JobState::Waiting);
    assert_eq!(stalled[0].stalled_count, 1);

    let counts = first.job_counts().await.unwrap();
    assert_eq!(counts.waiting, 1);
    assert_eq!(counts.active, 0);

    // Second stall goes over the limit
    second.fetch_next(now_millis(), 1).await.unwrap().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let check_at = now_millis();
    let (a, b) = tokio::join!(first.check_stalled(check_at, 1), second.check_stalled(check_at, 1));
    let stalled: Vec<_> = a.unwrap().into_iter().chain(b.unwrap()).collect();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].state, JobState::Failed);
    assert_eq!(stalled[0].failed_reason.as_deref(), Some(STALLED_LIMIT_REASON));

    let stored = second.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(first.job_counts().await.unwrap().failed, 1);

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_wait_entry_is_fetched_once() {
    let Some((first, second, broker)) = shared_pair_on().await else { return };
    let queue = Queue::new("test_slack_queue", first.clone());

    let job = queue.add("trade_announce", json!({ "trade": "{}" }), JobOptions::new(1)).await.unwrap();

    // Same id listed twice, as a requeue racing a promotion used to leave it
    let client = redis::Client::open(broker.connection_url().await.unwrap()).unwrap();
    let mut raw = client.get_multiplexed_async_connection().await.unwrap();
    let wait_key = format!("{}:test_slack_queue:wait", broker.key_prefix);
    let _: () = redis::cmd("LPUSH").arg(&wait_key).arg(job.id.as_str()).query_async(&mut raw).await.unwrap();

    let now = now_millis();
    let (a, b) = tokio::join!(first.fetch_next(now, 30_000), second.fetch_next(now, 30_000));
    let taken: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].id, job.id);
    assert_eq!(taken[0].attempts_made, 1);

    let counts = first.job_counts().await.unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.active, 1);

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_close_releases_connection() {
    let Some((first, second)) = shared_pair().await else { return };

    first.close().await.unwrap();
    first.close().await.unwrap();
    assert!(matches!(first.job_counts().await, Err(QueueError::QueueClosed(_))));
    assert!(second.job_counts().await.is_ok());

    second.close().await.unwrap();
}
