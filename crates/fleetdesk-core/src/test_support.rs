//! Helpers shared by unit tests that drive a paused tokio clock.

/// Let spawned tasks woken by a timer run to their next suspension point.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
