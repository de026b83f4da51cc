#![allow(dead_code)]

pub mod dialer;
pub mod mock_h2_server;
pub mod mock_server;
pub mod tls;

/// Install a test subscriber once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("veil=debug")
        .with_test_writer()
        .try_init();
}

/// GET request with an empty body.
pub fn get(url: &str) -> http::Request<bytes::Bytes> {
    http::Request::get(url)
        .body(bytes::Bytes::new())
        .expect("valid request")
}

/// Wait up to five seconds for `counter` to reach `expected`.
pub async fn wait_for(counter: &std::sync::atomic::AtomicUsize, expected: usize) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if counter.load(std::sync::atomic::Ordering::SeqCst) >= expected {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
