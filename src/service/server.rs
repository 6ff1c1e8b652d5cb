use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::DetectionService;
use super::protocol::{DetectionCodec, Message};
use crate::error::{ServiceError, WireError};

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// TCP front for a [`DetectionService`].
///
/// Every connection runs as its own task. Adapter calls go through
/// `spawn_blocking`, and the service still serialises them on its worker.
pub struct DetectionServer {
    listener: std::net::TcpListener,
    service: Arc<DetectionService>,
}

impl DetectionServer {
    /// Bind without needing a runtime; the socket joins one in [`Self::serve`].
    pub fn bind<A: ToSocketAddrs>(addr: A, service: DetectionService) -> Result<Self, ServiceError> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, backend = %service.backend_name(), "detection server listening");
        Ok(Self {
            listener,
            service: Arc::new(service),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServiceError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(self) -> Result<(), ServiceError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::from_std(self.listener)?;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    let service = Arc::clone(&self.service);
                    tokio::spawn(async move {
                        match handle_connection(stream, service).await {
                            Ok(()) => debug!(%peer, "connection closed"),
                            Err(e) => warn!(%peer, error = %e, "connection ended with error"),
                        }
                    });
                }
            }
        }
        info!("detection server stopped");
        Ok(())
    }

    /// Serve on a private multi-threaded runtime.
    ///
    /// For callers without a runtime of their own. Inside one, spawn
    /// [`Self::serve_with_shutdown`] instead.
    pub fn spawn(self) -> Result<ServerHandle, ServiceError> {
        let addr = self.local_addr()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("detection-server")
            .enable_all()
            .build()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = runtime.spawn(self.serve_with_shutdown(async move {
            // A dropped sender stops the server too.
            let _ = stop_rx.await;
        }));
        Ok(ServerHandle {
            addr,
            stop: Some(stop_tx),
            task: Some(task),
            runtime: Some(runtime),
        })
    }
}

/// Owner of a server started with [`DetectionServer::spawn`].
///
/// Must not be shut down or dropped from inside an async context.
pub struct ServerHandle {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
    runtime: Option<Runtime>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections, wait for the accept loop, then close the
    /// connections still open.
    pub fn shutdown(mut self) -> Result<(), ServiceError> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), ServiceError> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let result = match self.task.take() {
            Some(task) => runtime
                .block_on(task)
                .map_err(|e| ServiceError::Protocol(format!("server task failed: {e}")))
                .and_then(|served| served),
            None => Ok(()),
        };
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop_and_join() {
            warn!(error = %e, "detection server did not shut down cleanly");
        }
    }
}

async fn handle_connection(stream: TcpStream, service: Arc<DetectionService>) -> Result<(), ServiceError> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, DetectionCodec::new());

    while let Some(message) = framed.next().await {
        let Message::Request {
            request_id,
            request,
        } = message?
        else {
            return Err(ServiceError::Protocol("client sent a response frame".into()));
        };
        let frame_id = request.frame_id;
        let worker = Arc::clone(&service);
        let outcome = tokio::task::spawn_blocking(move || worker.detect(request))
            .await
            .map_err(|e| ServiceError::Protocol(format!("detection task failed: {e}")))?
            .map_err(|e| WireError::from_service_error(&e, service.backend_name(), frame_id));
        framed
            .send(Message::Response {
                request_id,
                outcome,
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendAdapter;
    use crate::detection::{Detection, Image, ImageEncoding};
    use crate::error::BackendError;
    use crate::service::{AsyncDetectionClient, DetectionRequest, ServiceConfig};
    use crate::tracker::Rect;

    struct Fixed;

    impl BackendAdapter for Fixed {
        fn get_detections(
            &mut self,
            _colour: &Image,
            _depth: Option<&Image>,
        ) -> Result<Vec<Detection>, BackendError> {
            Ok(vec![Detection::new(Rect::new(1.0, 1.0, 2.0, 2.0), "berry", 0.7)])
        }
    }

    fn service() -> DetectionService {
        DetectionService::new("fixed", Box::new(Fixed), &ServiceConfig::default()).unwrap()
    }

    fn frame(frame_id: u64) -> DetectionRequest {
        DetectionRequest::new(Image::new(1, 1, ImageEncoding::Mono8, vec![0]), frame_id, 0.0)
    }

    #[tokio::test]
    async fn test_serve_inside_caller_runtime() {
        let server = DetectionServer::bind("127.0.0.1:0", service()).unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let served = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = stop_rx.await;
        }));

        let mut client = AsyncDetectionClient::connect(addr, Duration::from_secs(2))
            .await
            .unwrap();
        let response = client.detect(&frame(6)).await.unwrap();
        assert_eq!(response.detections[0].frame_id, 6);

        stop_tx.send(()).unwrap();
        served.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connections_are_served_concurrently() {
        let server = DetectionServer::bind("127.0.0.1:0", service()).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let calls: Vec<_> = (0..4u64)
            .map(|i| {
                tokio::spawn(async move {
                    let mut client = AsyncDetectionClient::connect(addr, Duration::from_secs(2)).await?;
                    client.detect(&frame(i)).await
                })
            })
            .collect();
        for (i, call) in calls.into_iter().enumerate() {
            let response = call.await.unwrap().unwrap();
            assert_eq!(response.detections[0].frame_id, i as u64);
        }
    }

    #[test]
    fn test_shutdown_refuses_new_connections() {
        let server = DetectionServer::bind("127.0.0.1:0", service()).unwrap().spawn().unwrap();
        let addr = server.local_addr();
        server.shutdown().unwrap();
        assert!(std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    }
}
