use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Runtime;
use tokio::sync::oneshot::{self, Sender};
use warp::http::StatusCode;
use warp::Filter;

/// Web server which stands in for an ingress controller in front of a
/// cluster
///
/// Requests with the expected `Host` header are answered in turn by the
/// backends; the response body names the answering backend. Other hosts
/// get `404 Not Found`.
pub struct FakeBackend {
    // Drives the server until dropped
    _runtime: Runtime,
    address: SocketAddr,
    shutdown_sender: Option<Sender<()>>,
}

impl FakeBackend {
    /// Starts a server which distributes requests round-robin.
    pub fn start(host: &str, backends: &[&str]) -> Result<FakeBackend> {
        FakeBackend::with_failures(host, backends, 0)
    }

    /// Starts a server whose first `failures` requests fail with
    /// `503 Service Unavailable`.
    pub fn with_failures(host: &str, backends: &[&str], failures: usize) -> Result<FakeBackend> {
        FakeBackend::serve(host, backends, failures, Duration::ZERO)
    }

    /// Starts a server which holds every answer back for `delay`.
    pub fn with_delay(host: &str, backends: &[&str], delay: Duration) -> Result<FakeBackend> {
        FakeBackend::serve(host, backends, 0, delay)
    }

    fn serve(
        host: &str,
        backends: &[&str],
        failures: usize,
        delay: Duration,
    ) -> Result<FakeBackend> {
        let runtime = Runtime::new()?;

        let host = host.to_owned();
        let backends: Vec<String> = backends.iter().map(|name| name.to_string()).collect();
        let requests = Arc::new(AtomicUsize::new(0));

        let route = warp::header::optional::<String>("host").and_then(
            move |request_host: Option<String>| {
                let expected_host = host.to_owned();
                let backends = backends.to_owned();
                let requests = requests.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, Infallible>(answer(
                        request_host.as_deref() == Some(expected_host.as_str()),
                        &backends,
                        &requests,
                        failures,
                    ))
                }
            },
        );

        let (tx, rx) = oneshot::channel::<()>();

        let (address, server) = runtime.block_on(async {
            warp::serve(route).try_bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
                rx.await.ok();
            })
        })?;

        runtime.spawn(server);

        Ok(FakeBackend {
            _runtime: runtime,
            address,
            shutdown_sender: Some(tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

fn answer(
    host_matches: bool,
    backends: &[String],
    requests: &AtomicUsize,
    failures: usize,
) -> warp::reply::WithStatus<String> {
    if !host_matches {
        return warp::reply::with_status(
            String::from("no rule for this host"),
            StatusCode::NOT_FOUND,
        );
    }
    let request = requests.fetch_add(1, Ordering::SeqCst);
    if request < failures {
        return warp::reply::with_status(
            String::from("no endpoints available"),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }
    let backend = &backends[(request - failures) % backends.len()];
    warp::reply::with_status(
        format!("<html><body>Server name: {}</body></html>", backend),
        StatusCode::OK,
    )
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        if let Some(shutdown_sender) = self.shutdown_sender.take() {
            let _ = shutdown_sender.send(());
        }
    }
}
