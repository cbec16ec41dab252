use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 10;
const MAX_DELAY_MS: u64 = 200;

/// Error returned when a polled condition never held.
#[derive(Debug)]
pub struct WaitError {
    what: String,
    attempts: u32,
    waited: Duration,
    last_seen: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last seen: {}",
            self.attempts,
            self.waited,
            self.what,
            self.last_seen
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("<nothing>")
        )
    }
}

impl std::error::Error for WaitError {}

fn next_delay(delay: Duration) -> Duration {
    delay
        .checked_mul(2)
        .unwrap_or(Duration::from_millis(MAX_DELAY_MS))
        .min(Duration::from_millis(MAX_DELAY_MS))
}

/// Poll `check` with exponential backoff until it returns true.
///
/// Sleeps on the tokio timer so background tasks on the same runtime keep
/// making progress.
pub async fn wait_until<F>(what: &str, timeout: Duration, mut check: F) -> Result<(), WaitError>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;

    loop {
        attempts += 1;
        if check() {
            return Ok(());
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                what: what.to_string(),
                attempts,
                waited: start.elapsed(),
                last_seen: None,
            });
        }

        tokio::time::sleep(delay.min(remaining)).await;
        delay = next_delay(delay);
    }
}

/// Poll a file until its content satisfies `predicate`.
pub async fn wait_for_file_content<P, F>(
    path: P,
    predicate: F,
    timeout: Duration,
) -> Result<String, WaitError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> bool,
{
    let path: PathBuf = path.as_ref().to_path_buf();
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_seen = None;

    loop {
        attempts += 1;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                if predicate(&content) {
                    return Ok(content);
                }
                last_seen = Some(content);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => last_seen = Some(err.to_string()),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                what: path.display().to_string(),
                attempts,
                waited: start.elapsed(),
                last_seen,
            });
        }

        tokio::time::sleep(delay.min(remaining)).await;
        delay = next_delay(delay);
    }
}
