use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use nix::sys::stat::{umask, Mode};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::error::{RaplDrvError, Result};
use crate::prom::DispatchMetricExporter;
use crate::wire;

/// The umask is process-wide; binds that change it take turns
static UMASK_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Serves a device on its well-known socket path
pub struct Server {
    device: Arc<Device>,
    listener: UnixListener,
    metrics: Option<Arc<DispatchMetricExporter>>,
}

impl Server {
    /// Bind the device's socket path, replacing a stale socket left by a
    /// previous run. Anything other than a socket at that path is an error.
    pub fn bind(device: Arc<Device>) -> Result<Self> {
        let path = device.path();
        remove_stale_socket(path)?;

        // Only the owner (the privileged service account) may issue requests.
        // The socket is created 0600 rather than narrowed after bind.
        let listener = {
            let _guard = UMASK_LOCK.lock();
            let previous = umask(Mode::from_bits_truncate(0o177));
            let bound = UnixListener::bind(path);
            umask(previous);
            bound
        }?;

        tracing::warn!("Device {} listening on {}", device.name(), path.display());

        Ok(Self {
            device,
            listener,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetricExporter>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Accept connections until `cancel_token` fires, then stop the device,
    /// let open connections drain and remove the socket file.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<()> {
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, _addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    let device = Arc::clone(&self.device);
                    let metrics = self.metrics.clone();
                    let token = cancel_token.clone();
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(device, stream, metrics, token).await {
                            tracing::warn!("Connection closed with error: {}", e);
                        }
                    });
                }
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        self.device.shutdown();
        tracing::info!("Waiting for {} open connections to close", connections.len());
        while let Some(done) = connections.join_next().await {
            if let Err(e) = done {
                tracing::error!("Connection task failed: {}", e);
            }
        }

        if let Err(e) = std::fs::remove_file(self.device.path()) {
            tracing::warn!("Failed to remove {}: {}", self.device.path().display(), e);
        }
        tracing::info!("Device {} unloaded", self.device.name());
        Ok(())
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::info!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(RaplDrvError::DeviceError(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// One connection is one open handle; requests on it are handled in order
async fn serve_connection(
    device: Arc<Device>,
    stream: UnixStream,
    metrics: Option<Arc<DispatchMetricExporter>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let handle = device.open()?;
    let (mut reader, mut writer) = stream.into_split();

    let result = async {
        loop {
            let req = tokio::select! {
                _ = cancel_token.cancelled() => break,
                next = wire::read_request(&mut reader) => match next? {
                    Some(req) => req,
                    None => break,
                },
            };

            // Register access blocks on device I/O; keep it off the reactor
            let dev = Arc::clone(&device);
            let req = tokio::task::spawn_blocking(move || dev.control(&handle, req))
                .await
                .map_err(|e| RaplDrvError::DeviceError(format!("dispatch task failed: {e}")))?;

            if let Some(metrics) = &metrics {
                metrics.observe(req.status());
            }
            wire::write_response(&mut writer, &req).await?;
        }
        Ok::<(), RaplDrvError>(())
    }
    .await;

    device.cleanup(&handle);
    device.close(handle);
    result
}

async fn metrics_handler(State(metrics): State<Arc<DispatchMetricExporter>>) -> impl IntoResponse {
    let (content_type, buffer) = metrics.gather();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

/// Serve `/metrics` on `addr` until `cancel_token` fires
pub async fn serve_metrics(
    addr: std::net::SocketAddr,
    metrics: Arc<DispatchMetricExporter>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::warn!("Starting metrics server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimulatedRegisters;
    use crate::client::Client;
    use crate::common::clock::MonotonicClock;
    use crate::dispatch::{Dispatcher, Request, Status};
    use rapldrv_raw::rapl::msr;
    use std::path::PathBuf;

    fn socket_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rapldrv-{}-{}.sock", tag, std::process::id()))
    }

    fn start(
        tag: &str,
    ) -> (
        PathBuf,
        Arc<DispatchMetricExporter>,
        CancellationToken,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let path = socket_path(tag);
        let dispatcher = Dispatcher::new(
            Arc::new(SimulatedRegisters::rapl_package()),
            Arc::new(MonotonicClock),
        );
        let device = Arc::new(Device::create("RAPLDriver", &path, dispatcher));
        let metrics = Arc::new(DispatchMetricExporter::new().unwrap());
        let server = Server::bind(device).unwrap().with_metrics(Arc::clone(&metrics));

        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));
        (path, metrics, token, handle)
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let (path, metrics, token, handle) = start("roundtrip");

        let mut client = Client::connect(&path).await.unwrap();
        assert_eq!(client.read_register(1).await.unwrap(), 0x1111_1111_1111_1111);
        assert_eq!(client.read_register(2).await.unwrap(), 0x2222_2222_2222_2222);
        assert_eq!(
            client.read_register(msr::MSR_RAPL_POWER_UNIT).await.unwrap(),
            0x000A_0E03
        );

        let resp = client.call(&Request::new(0x2FB0, vec![1, 0])).await.unwrap();
        assert_eq!(resp.status(), Some(Status::InvalidRequest));
        assert!(resp.output.is_empty());

        let err = client.read_register(0xDEAD).await.unwrap_err();
        assert!(err.to_string().contains("access_fault"));

        drop(client);
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(metrics.count(Status::Success), 3);
        assert_eq!(metrics.count(Status::InvalidRequest), 1);
        assert_eq!(metrics.count(Status::AccessFault), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_socket_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (path, _metrics, token, handle) = start("mode");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let (path, _metrics, token, handle) = start("concurrent");

        let mut tasks = Vec::new();
        for worker in 0..4u32 {
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                let mut client = Client::connect(&path).await.unwrap();
                for i in 0..50u32 {
                    let register = 1 + (worker + i) % 2;
                    let expected = if register == 1 {
                        0x1111_1111_1111_1111
                    } else {
                        0x2222_2222_2222_2222
                    };
                    assert_eq!(client.read_register(register).await.unwrap(), expected);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_refuses_to_replace_regular_file() {
        let path = socket_path("regular");
        std::fs::write(&path, b"not a socket").unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(SimulatedRegisters::new()),
            Arc::new(MonotonicClock),
        );
        let device = Arc::new(Device::create("RAPLDriver", &path, dispatcher));
        assert!(Server::bind(device).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
