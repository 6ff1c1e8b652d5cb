use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::protocol::{DetectionCodec, Message, RequestRef};
use super::{DetectionRequest, DetectionResponse};
use crate::error::ServiceError;

type Connection = Framed<TcpStream, DetectionCodec>;

async fn open(addr: SocketAddr, timeout: Duration) -> Result<Connection, ServiceError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ServiceError::Timeout { timeout })??;
    stream.set_nodelay(true)?;
    Ok(Framed::new(stream, DetectionCodec::new()))
}

/// Remote caller for a [`super::DetectionServer`], for use inside a runtime.
///
/// A call that times out drops the connection so a late answer can never be
/// mistaken for the next one; the following call reconnects.
pub struct AsyncDetectionClient {
    addr: SocketAddr,
    timeout: Duration,
    next_request_id: u64,
    conn: Option<Connection>,
}

impl AsyncDetectionClient {
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ServiceError> {
        let conn = open(addr, timeout).await?;
        debug!(%addr, "connected to detection server");
        Ok(Self {
            addr,
            timeout,
            next_request_id: 1,
            conn: Some(conn),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let timeout = self.timeout;

        let result = match tokio::time::timeout(timeout, self.exchange(request_id, request)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout { timeout }),
        };
        match &result {
            Err(ServiceError::Timeout { .. }) if self.conn.is_some() => {
                warn!(frame_id = request.frame_id, ?timeout, "remote detection timed out");
                self.conn = None;
            }
            Err(ServiceError::Io(_) | ServiceError::Protocol(_) | ServiceError::ServiceStopped) => {
                self.conn = None;
            }
            _ => {}
        }
        result
    }

    async fn exchange(
        &mut self,
        request_id: u64,
        request: &DetectionRequest,
    ) -> Result<DetectionResponse, ServiceError> {
        if self.conn.is_none() {
            debug!(addr = %self.addr, "reconnecting to detection server");
            self.conn = Some(open(self.addr, self.timeout).await?);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ServiceError::ServiceStopped);
        };

        conn.send(RequestRef {
            request_id,
            request,
        })
        .await?;

        while let Some(message) = conn.next().await {
            match message? {
                Message::Response {
                    request_id: id,
                    outcome,
                } if id == request_id => {
                    return outcome.map_err(|e| e.into_service_error());
                }
                Message::Response { request_id: id, .. } => {
                    debug!(stale = id, expected = request_id, "discarding stale response");
                }
                Message::Request { .. } => {
                    return Err(ServiceError::Protocol("server sent a request frame".into()));
                }
            }
        }
        Err(ServiceError::ServiceStopped)
    }
}

/// Blocking [`AsyncDetectionClient`] on a private single-threaded runtime.
///
/// Must not be called from inside an async context.
pub struct DetectionClient {
    runtime: Runtime,
    inner: AsyncDetectionClient,
}

impl DetectionClient {
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self, ServiceError> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ServiceError::Protocol("address resolved to nothing".into()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let inner = runtime.block_on(AsyncDetectionClient::connect(addr, timeout))?;
        Ok(Self { runtime, inner })
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    pub fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        self.runtime.block_on(self.inner.detect(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendAdapter;
    use crate::detection::{Detection, Image, ImageEncoding};
    use crate::error::BackendError;
    use crate::service::{DetectionServer, DetectionService, ServerHandle, ServiceConfig};
    use crate::tracker::Rect;

    struct Echo;

    impl BackendAdapter for Echo {
        fn get_detections(
            &mut self,
            colour: &Image,
            _depth: Option<&Image>,
        ) -> Result<Vec<Detection>, BackendError> {
            if colour.width == 0 {
                return Err(BackendError::Inference("empty frame".into()));
            }
            if colour.width == 99 {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(vec![Detection::new(
                Rect::new(0.0, 0.0, colour.width as f32, colour.height as f32),
                "berry",
                0.8,
            )])
        }
    }

    fn echo_service(timeout_ms: u64) -> DetectionService {
        let config = ServiceConfig {
            timeout_ms,
            ..Default::default()
        };
        DetectionService::new("echo", Box::new(Echo), &config).unwrap()
    }

    fn serve(timeout_ms: u64) -> ServerHandle {
        DetectionServer::bind("127.0.0.1:0", echo_service(timeout_ms))
            .unwrap()
            .spawn()
            .unwrap()
    }

    fn frame(width: u32, frame_id: u64) -> DetectionRequest {
        let data = vec![0; width as usize * 2];
        DetectionRequest::new(Image::new(width, 2, ImageEncoding::Mono8, data), frame_id, 1.0)
    }

    #[test]
    fn test_remote_call_matches_local() {
        let server = serve(1000);
        let mut client = DetectionClient::connect(server.local_addr(), Duration::from_secs(2)).unwrap();
        let response = client.detect(&frame(5, 8)).unwrap();
        assert_eq!(response.backend_name, "echo");
        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].bbox, Rect::new(0.0, 0.0, 5.0, 2.0));
        assert_eq!(response.detections[0].frame_id, 8);
        server.shutdown().unwrap();
    }

    #[test]
    fn test_remote_inference_error_keeps_kind() {
        let server = serve(1000);
        let mut client = DetectionClient::connect(server.local_addr(), Duration::from_secs(2)).unwrap();
        let err = client.detect(&frame(0, 3)).unwrap_err();
        assert!(matches!(err, ServiceError::Inference { frame_id: 3, ref backend, .. } if backend == "echo"));
        assert!(client.detect(&frame(4, 4)).is_ok());
    }

    #[test]
    fn test_client_timeout_then_recovers() {
        let server = serve(5000);
        let mut client =
            DetectionClient::connect(server.local_addr(), Duration::from_millis(50)).unwrap();
        let err = client.detect(&frame(99, 1)).unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));

        std::thread::sleep(Duration::from_millis(400));
        let response = client.detect(&frame(3, 2)).unwrap();
        assert_eq!(response.detections[0].frame_id, 2);
    }

    #[test]
    fn test_server_side_timeout_is_reported() {
        let server = serve(30);
        let mut client = DetectionClient::connect(server.local_addr(), Duration::from_secs(2)).unwrap();
        let err = client.detect(&frame(99, 1)).unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { timeout } if timeout == Duration::from_millis(30)));
    }

    #[test]
    fn test_reconnects_after_server_restart_on_same_port() {
        let server = serve(1000);
        let addr = server.local_addr();
        let mut client = DetectionClient::connect(addr, Duration::from_secs(2)).unwrap();
        assert!(client.detect(&frame(2, 1)).is_ok());
        server.shutdown().unwrap();

        assert!(client.detect(&frame(2, 2)).is_err());
        let restarted = DetectionServer::bind(addr, echo_service(1000)).unwrap().spawn().unwrap();
        assert_eq!(client.detect(&frame(2, 3)).unwrap().detections[0].frame_id, 3);
        restarted.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_async_client_times_out_without_blocking_runtime() {
        let server = DetectionServer::bind("127.0.0.1:0", echo_service(5000)).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let mut client = AsyncDetectionClient::connect(addr, Duration::from_millis(50))
            .await
            .unwrap();
        let err = client.detect(&frame(99, 1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(client.detect(&frame(3, 2)).await.unwrap().detections[0].frame_id, 2);
    }
}
