use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crosscut::{method, with_retry, Backoff, CoreError, CoreResult, RetryPolicy};

fn quick(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .with_backoff(Backoff::Fixed)
        .with_initial_delay(Duration::from_millis(1))
}

fn store_offline() -> CoreError {
    CoreError::service(io::Error::new(io::ErrorKind::ConnectionRefused, "store offline"))
}

#[tokio::test]
async fn always_failing_operation_runs_exactly_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let result: CoreResult<()> = quick(3)
        .execute(|| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(store_offline())
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // The final attempt's error comes back unchanged in type and message.
    let err = result.unwrap_err();
    let io_err = err.service_ref::<io::Error>().expect("original error type preserved");
    assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
    assert_eq!(err.to_string(), "store offline");
}

#[tokio::test]
async fn success_returns_immediately_without_further_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let result = quick(5)
        .execute(|| {
            let counted = counted.clone();
            async move {
                if counted.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(store_offline())
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn max_attempts_of_one_never_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let result: CoreResult<()> = quick(1)
        .execute(|| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(store_offline())
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn always_false_predicate_propagates_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let policy = quick(5).should_retry(|_| false);
    let result: CoreResult<()> = policy
        .execute(|| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(store_offline())
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn on_retry_observes_each_scheduled_retry_without_changing_flow() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let policy = quick(3).on_retry(move |attempt, error| {
        sink.lock().unwrap().push((attempt, error.to_string()));
    });

    let result: CoreResult<()> = policy.execute(|| async { Err(store_offline()) }).await;
    assert!(result.is_err());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2); // retries after attempts 1 and 2, not after the last
    assert_eq!(seen[0], (1, "store offline".to_string()));
    assert_eq!(seen[1].0, 2);
}

#[tokio::test]
async fn wrapped_method_is_reinvoked_with_the_same_arguments() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let flaky = method(move |(id,): (String,)| {
        let counted = counted.clone();
        async move {
            if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(store_offline())
            } else {
                Ok(format!("appointment-{id}"))
            }
        }
    });

    let retried = with_retry(flaky, quick(3));
    let result = retried(("a1".to_string(),)).await.unwrap();

    assert_eq!(result, "appointment-a1");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
