use boring::ssl::SslAcceptor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// A simple HTTP/1.1 mock server that handles keep-alive connections.
///
/// Every response is `200 OK` with body `hello from <path>`.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl MockHttpServer {
    /// Create a new mock server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            accepted: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Counter of accepted TCP connections.
    pub fn accepted(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.accepted)
    }

    /// Serve plaintext HTTP/1.1 in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(stream));
            }
        })
    }

    /// Serve HTTP/1.1 over TLS in a background task.
    pub fn start_tls(self, acceptor: SslAcceptor) -> tokio::task::JoinHandle<()> {
        let acceptor = Arc::new(acceptor);
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                let acceptor = Arc::clone(&acceptor);
                tokio::spawn(async move {
                    match tokio_boring::accept(&acceptor, stream).await {
                        Ok(tls) => handle_connection(tls).await,
                        Err(e) => tracing::debug!("server TLS accept failed: {}", e),
                    }
                });
            }
        })
    }
}

/// Handle a single connection, processing requests until the client goes away.
pub async fn handle_connection<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending = Vec::new();
    loop {
        let head_end = loop {
            if let Some(pos) = find_head_end(&pending) {
                break pos;
            }
            let mut buf = [0u8; 8192];
            let n = match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => n,
                // Closed, failed or idle
                _ => return,
            };
            pending.extend_from_slice(&buf[..n]);
        };

        let head = String::from_utf8_lossy(&pending[..head_end]).to_string();
        pending.drain(..head_end + 4);

        let path = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();
        let body = format!("hello from {}", path);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
            body.len(),
            body
        );

        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        if stream.flush().await.is_err() {
            return;
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
