//! Test utilities for tick and background-write tests
//!
//! Only compiled in test builds. Prefer these over bare `tokio::time::sleep()`
//! so timing tests wait for a condition instead of guessing a delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Retry `f` every `interval` until it returns `Ok`, panicking after `timeout`.
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Wait until the watched value satisfies `predicate` and return it.
pub async fn wait_for_value<T, P>(
    desc: &str,
    rx: &mut watch::Receiver<T>,
    timeout: Duration,
    predicate: P,
) -> T
where
    T: Clone,
    P: Fn(&T) -> bool,
{
    let waited = tokio::time::timeout(timeout, async {
        loop {
            {
                let current = rx.borrow_and_update();
                if predicate(&current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("Sender dropped while waiting for {}", desc);
            }
        }
    })
    .await;

    match waited {
        Ok(value) => value,
        Err(_) => panic!("Timeout waiting for {} after {:?}", desc, timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_assert_eventually_succeeds_after_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = assert_eventually(
            "counter to reach 3",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let c = Arc::clone(&counter_clone);
                async move {
                    let val = c.fetch_add(1, Ordering::SeqCst);
                    if val >= 2 {
                        Ok(val)
                    } else {
                        Err(format!("counter only at {}", val))
                    }
                }
            },
        )
        .await;

        assert!(result >= 2);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for never succeeds")]
    async fn test_assert_eventually_times_out() {
        assert_eventually(
            "never succeeds",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { Err::<(), _>("always fails") },
        )
        .await;
    }

    #[tokio::test]
    async fn test_wait_for_value_sees_later_send() {
        let (tx, mut rx) = watch::channel(0u32);
        tokio::spawn(async move {
            for i in 1..=3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                tx.send_replace(i);
            }
            // Keep the sender alive until the receiver has seen the last value
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let value = wait_for_value("value 3", &mut rx, Duration::from_secs(2), |v| *v == 3).await;
        assert_eq!(value, 3);
    }
}
