use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use veil::transport::io::BoxedIo;
use veil::Dial;

/// Dialer that sends every address to local servers and records the dials.
///
/// Lets tests use hostnames like `example.test` for SNI and policy checks
/// while all traffic lands on `127.0.0.1`. Hosts go to the default port
/// unless routed elsewhere, and can be held back or stalled.
#[derive(Clone)]
pub struct RedirectDialer {
    target: SocketAddr,
    routes: Arc<Mutex<HashMap<String, u16>>>,
    gates: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    stalled: Arc<Mutex<HashSet<String>>>,
    dials: Arc<AtomicUsize>,
    addrs: Arc<Mutex<Vec<String>>>,
}

impl RedirectDialer {
    pub fn new(port: u16) -> Self {
        Self {
            target: SocketAddr::from(([127, 0, 0, 1], port)),
            routes: Arc::new(Mutex::new(HashMap::new())),
            gates: Arc::new(Mutex::new(HashMap::new())),
            stalled: Arc::new(Mutex::new(HashSet::new())),
            dials: Arc::new(AtomicUsize::new(0)),
            addrs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Send dials for `host` to `port` instead of the default.
    pub fn route(self, host: &str, port: u16) -> Self {
        self.routes.lock().unwrap().insert(host.to_string(), port);
        self
    }

    /// Hold dials for `host` until the returned gate is notified.
    pub fn gate(&self, host: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(host.to_string(), Arc::clone(&gate));
        gate
    }

    /// Dials for `host` never complete.
    pub fn stall(self, host: &str) -> Self {
        self.stalled.lock().unwrap().insert(host.to_string());
        self
    }

    /// Number of dials so far.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Requested addresses, in dial order.
    pub fn addrs(&self) -> Vec<String> {
        self.addrs.lock().unwrap().clone()
    }
}

impl Dial for RedirectDialer {
    fn dial<'a>(&'a self, _network: &'a str, addr: &'a str) -> BoxFuture<'a, std::io::Result<BoxedIo>> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::SeqCst);
            self.addrs.lock().unwrap().push(addr.to_string());

            let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
            let stalled = self.stalled.lock().unwrap().contains(host);
            if stalled {
                std::future::pending::<()>().await;
            }
            let gate = self.gates.lock().unwrap().get(host).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            let port = self.routes.lock().unwrap().get(host).copied();
            let target = port.map_or(self.target, |port| SocketAddr::from(([127, 0, 0, 1], port)));
            let stream = TcpStream::connect(target).await?;
            Ok(Box::new(stream) as BoxedIo)
        })
    }
}
