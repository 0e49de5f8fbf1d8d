use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use flush_pool::Config;
use rstest::rstest;
use tokio::time::Instant;

use crate::types::{engine, OddFailingProcessor, RecordingProcessor};

fn config(batch_size: usize, pool_size: usize, timeout: Duration) -> Config {
    Config::builder()
        .name("triggers")
        .batch_size(batch_size)
        .pool_size(pool_size)
        .timeout(timeout)
        .build()
}

/// Given a long timeout
/// When we submit exactly one batch worth of items
/// Then it should process them together, without waiting for the timeout
#[tokio::test]
#[rstest]
#[timeout(Duration::from_secs(5))]
async fn flushes_when_batch_is_full() {
    tokio::time::pause();

    let (processor, mut flushed) = RecordingProcessor::new();
    let engine = engine(processor.clone(), config(10, 1, Duration::from_secs(60)));

    let start = Instant::now();
    for i in 0..10 {
        engine.add(i).await.unwrap();
    }

    let size = tokio::time::timeout(Duration::from_secs(1), flushed.recv())
        .await
        .expect("should flush before the timeout")
        .unwrap();

    assert_eq!(size, 10);
    assert!(start.elapsed() < Duration::from_secs(60));
    assert_eq!(processor.batches(), vec![(0..10).collect::<Vec<_>>()]);

    engine.stop().await;
    assert_eq!(processor.calls(), 1, "nothing left over to drain");
}

/// Given a batch size larger than what we submit
/// When we wait longer than the timeout
/// Then the partial batch should be processed once, and nothing more until new items arrive
#[tokio::test]
#[rstest]
#[timeout(Duration::from_secs(5))]
async fn flushes_partial_batch_after_timeout() {
    tokio::time::pause();

    let (processor, _flushed) = RecordingProcessor::new();
    let engine = engine(processor.clone(), config(10, 1, Duration::from_millis(100)));

    for i in 0..3 {
        engine.add(i).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(processor.batches(), vec![vec![0, 1, 2]]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(processor.calls(), 1, "empty timers should not process");

    engine.add(3).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(processor.batches(), vec![vec![0, 1, 2], vec![3]]);

    engine.stop().await;
    assert_eq!(processor.calls(), 2);
}

/// Given an engine that is never given any items
/// When many timeouts pass
/// Then the processor should never be called
#[tokio::test]
async fn idle_timers_do_not_process() {
    tokio::time::pause();

    let (processor, _flushed) = RecordingProcessor::<u32>::new();
    let engine = engine(processor.clone(), config(10, 4, Duration::from_millis(10)));

    tokio::time::sleep(Duration::from_secs(5)).await;
    engine.stop().await;

    assert_eq!(processor.calls(), 0);
}

/// Given one worker with batch size 10
/// When we submit 25 items without pausing, then stop
/// Then every item should be processed, in batches of at most 10
#[rstest]
#[case::without_yielding(false)]
#[case::yielding_between_items(true)]
#[tokio::test]
async fn splits_into_bounded_batches(#[case] yield_between: bool) {
    tokio::time::pause();

    let (processor, _flushed) = RecordingProcessor::new();
    let engine = engine(processor.clone(), config(10, 1, Duration::from_millis(100)));

    for i in 0..25 {
        engine.add(i).await.unwrap();
        if yield_between {
            tokio::task::yield_now().await;
        }
    }
    engine.stop().await;

    let sizes = processor.batch_sizes();
    assert!(sizes.len() >= 2, "{sizes:?}");
    assert!(sizes.iter().all(|size| *size <= 10), "{sizes:?}");
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(processor.items(), (0..25).collect::<Vec<_>>());
}

/// Given a single worker
/// When items trickle in across several flushes
/// Then they should be processed in the order they were submitted
#[tokio::test]
async fn single_worker_preserves_order() {
    tokio::time::pause();

    let (processor, _flushed) = RecordingProcessor::new();
    let engine = engine(processor.clone(), config(7, 1, Duration::from_millis(20)));

    for i in 0..100 {
        engine.add(i).await.unwrap();
        if i % 9 == 0 {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
    }
    engine.stop().await;

    assert_eq!(processor.items(), (0..100).collect::<Vec<_>>());
    assert!(processor.batch_sizes().iter().all(|size| *size <= 7));
}

/// Given a processor which reports errors for some items
/// When we submit items
/// Then every batch should still be processed exactly once, and the engine keeps going
#[tokio::test]
async fn item_errors_are_not_retried() {
    tokio::time::pause();

    let processed = Arc::new(Mutex::new(Vec::new()));
    let processor = OddFailingProcessor {
        processed: Arc::clone(&processed),
    };
    let engine = engine(processor, config(4, 2, Duration::from_millis(50)));

    for i in 0..20 {
        engine.add(i).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    engine.add(20).await.unwrap();
    engine.stop().await;

    let mut processed = processed.lock().unwrap().clone();
    processed.sort_unstable();
    assert_eq!(processed, (0..=20).collect::<Vec<_>>());
}
