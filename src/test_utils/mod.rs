pub(crate) mod memory_store;

pub(crate) use memory_store::*;

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// This will ensure the logger is only initialized once.
pub(crate) fn enable_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `probe` until it returns true or the timeout elapses. Notification
/// delivery is asynchronous relative to the caller, so scenario tests wait
/// for convergence instead of sleeping fixed amounts.
pub(crate) async fn wait_until<F, Fut>(probe: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
