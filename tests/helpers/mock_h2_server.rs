use boring::ssl::SslAcceptor;
use bytes::Bytes;
use h2::server::SendResponse;
use http::{Request, Response, Uri};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use super::mock_server::handle_connection;

/// A server push to attach to every response.
#[derive(Clone)]
pub struct PushSpec {
    pub path: &'static str,
    pub body: Bytes,
}

/// HTTP/2-over-TLS test server built on `h2::server`.
///
/// Every response is `200 OK` with body `hello h2 from <path>`.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
    accepted: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    closed_before_preface: Arc<AtomicUsize>,
    goaway_after: Option<usize>,
}

/// Per-connection serving options and counters.
#[derive(Clone)]
struct Serve {
    requests: Arc<AtomicUsize>,
    closed_before_preface: Arc<AtomicUsize>,
    goaway_after: Option<usize>,
    push: Option<PushSpec>,
}

impl MockH2Server {
    /// Create a new mock server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            accepted: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
            closed_before_preface: Arc::new(AtomicUsize::new(0)),
            goaway_after: None,
        })
    }

    /// Send GOAWAY on each connection once it has served `requests` requests.
    pub fn goaway_after(mut self, requests: usize) -> Self {
        self.goaway_after = Some(requests);
        self
    }

    /// Get the port this server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Counter of accepted TCP connections.
    pub fn accepted(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.accepted)
    }

    /// Counter of HTTP/2 requests served.
    pub fn requests(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }

    /// Counter of TLS connections the client closed before sending the
    /// HTTP/2 preface.
    pub fn closed_before_preface(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed_before_preface)
    }

    /// Serve in a background task, optionally pushing `push` with every response.
    pub fn start_tls(self, acceptor: SslAcceptor, push: Option<PushSpec>) -> tokio::task::JoinHandle<()> {
        self.spawn(acceptor, push, false)
    }

    /// Serve HTTP/2 when ALPN selected `h2` and HTTP/1.1 otherwise.
    pub fn start_tls_dual(self, acceptor: SslAcceptor) -> tokio::task::JoinHandle<()> {
        self.spawn(acceptor, None, true)
    }

    fn spawn(self, acceptor: SslAcceptor, push: Option<PushSpec>, dual: bool) -> tokio::task::JoinHandle<()> {
        let acceptor = Arc::new(acceptor);
        let serve = Serve {
            requests: Arc::clone(&self.requests),
            closed_before_preface: Arc::clone(&self.closed_before_preface),
            goaway_after: self.goaway_after,
            push,
        };
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                let acceptor = Arc::clone(&acceptor);
                let serve = serve.clone();
                tokio::spawn(async move {
                    let tls = match tokio_boring::accept(&acceptor, stream).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            tracing::debug!("server TLS accept failed: {}", e);
                            return;
                        }
                    };
                    let h2 = tls.ssl().selected_alpn_protocol() == Some(b"h2".as_slice());
                    if dual && !h2 {
                        handle_connection(tls).await;
                    } else {
                        serve_h2(tls, serve).await;
                    }
                });
            }
        })
    }
}

async fn serve_h2<S>(io: S, serve: Serve)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = match h2::server::handshake(io).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::debug!("server h2 handshake failed: {}", e);
            serve.closed_before_preface.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    let mut served = 0;
    while let Some(accepted) = conn.accept().await {
        let Ok((request, respond)) = accepted else { break };
        serve.requests.fetch_add(1, Ordering::SeqCst);
        served += 1;
        let push = serve.push.clone();
        tokio::spawn(async move {
            if let Err(e) = respond_to(request, respond, push).await {
                tracing::debug!("server stream failed: {}", e);
            }
        });
        if serve.goaway_after == Some(served) {
            // Finishes in-flight streams, then closes
            conn.graceful_shutdown();
        }
    }
}

async fn respond_to(
    request: Request<h2::RecvStream>,
    mut respond: SendResponse<Bytes>,
    push: Option<PushSpec>,
) -> Result<(), h2::Error> {
    let path = request.uri().path().to_string();

    if let Some(push) = push {
        let authority = request
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "example.test".to_string());
        let uri = Uri::builder()
            .scheme("https")
            .authority(authority.as_str())
            .path_and_query(push.path)
            .build()
            .expect("valid push uri");
        let promise = Request::get(uri).body(()).expect("valid push request");

        let mut pushed = respond.push_request(promise)?;
        let mut pushed_body = pushed.send_response(Response::new(()), false)?;
        pushed_body.send_data(push.body, true)?;
    }

    let mut body = respond.send_response(Response::new(()), false)?;
    body.send_data(Bytes::from(format!("hello h2 from {}", path)), true)?;
    Ok(())
}
