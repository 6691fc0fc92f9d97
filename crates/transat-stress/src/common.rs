use std::future::Future;
use std::io;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Setup Ctrl+C handler, returns a token that is cancelled on signal.
pub fn setup_ctrlc() -> CancellationToken {
    cancel_on(tokio::signal::ctrl_c())
}

/// Cancel the returned token once `signal` resolves successfully.
///
/// If the signal cannot be listened for, the token is left alone: in-flight
/// sends keep running instead of being cancelled at once.
fn cancel_on<F>(signal: F) -> CancellationToken
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if let Err(e) = signal.await {
            tracing::warn!("cannot listen for Ctrl+C, sends will not be cancellable: {e}");
            return;
        }
        eprintln!("\nCtrl+C received, cancelling in-flight sends...");
        t.cancel();
    });
    token
}

/// Elapsed seconds since `start`.
pub fn elapsed_s(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

/// Elapsed milliseconds since `start`.
pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
