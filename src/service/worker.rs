use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::{DetectionRequest, DetectionResponse, ServiceConfig};
use crate::backend::{BackendAdapter, BackendArgs, resolve_backend};
use crate::error::{BackendError, ServiceError};

type Reply = Result<DetectionResponse, ServiceError>;

struct Job {
    request: DetectionRequest,
    deadline: Instant,
    reply: Sender<Reply>,
}

/// Serialising front for one backend adapter.
///
/// The adapter lives on a private worker thread and sees one request at a
/// time. A caller that times out stops waiting; the adapter call it started
/// keeps running and its result is dropped.
pub struct DetectionService {
    backend_name: String,
    timeout: Duration,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DetectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionService")
            .field("backend_name", &self.backend_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DetectionService {
    pub fn new(
        backend_name: impl Into<String>,
        adapter: Box<dyn BackendAdapter>,
        config: &ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let backend_name = backend_name.into();
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded::<Job>(config.queue_depth);

        let worker_name = backend_name.clone();
        let worker = thread::Builder::new()
            .name(format!("detector-{backend_name}"))
            .spawn(move || run_worker(worker_name, adapter, jobs_rx))?;

        info!(backend = %backend_name, timeout_ms = config.timeout_ms, "detection service started");
        Ok(Self {
            backend_name,
            timeout: config.timeout(),
            jobs: Some(jobs_tx),
            worker: Some(worker),
        })
    }

    /// Resolve `backend_name` from the process-wide registry and serve it.
    pub fn from_registry(
        backend_name: &str,
        args: &BackendArgs,
        config: &ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let adapter = resolve_backend(backend_name, args)?;
        Self::new(backend_name, adapter, config)
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the backend on one frame, waiting at most the configured timeout.
    pub fn detect(&self, request: DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        self.detect_with_timeout(request, self.timeout)
    }

    pub fn detect_with_timeout(
        &self,
        request: DetectionRequest,
        timeout: Duration,
    ) -> Result<DetectionResponse, ServiceError> {
        let jobs = self.jobs.as_ref().ok_or(ServiceError::ServiceStopped)?;
        let deadline = Instant::now() + timeout;
        let frame_id = request.frame_id;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);

        let job = Job {
            request,
            deadline,
            reply: reply_tx,
        };
        match jobs.send_deadline(job, deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(backend = %self.backend_name, frame_id, "detection queue full, request timed out");
                return Err(ServiceError::Timeout { timeout });
            }
            Err(SendTimeoutError::Disconnected(_)) => return Err(ServiceError::ServiceStopped),
        }

        match reply_rx.recv_deadline(deadline) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                warn!(backend = %self.backend_name, frame_id, ?timeout, "detection timed out, result will be discarded");
                Err(ServiceError::Timeout { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::ServiceStopped),
        }
    }
}

impl Drop for DetectionService {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once the in-flight call returns.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(backend = %self.backend_name, "detection worker panicked");
            }
        }
        info!(backend = %self.backend_name, "detection service stopped");
    }
}

fn run_worker(backend_name: String, mut adapter: Box<dyn BackendAdapter>, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        let frame_id = job.request.frame_id;
        if Instant::now() >= job.deadline {
            debug!(backend = %backend_name, frame_id, "skipping request whose caller already gave up");
            continue;
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            adapter.get_detections(&job.request.colour, job.request.depth.as_ref())
        }))
        .unwrap_or_else(|payload| Err(BackendError::Inference(panic_message(payload.as_ref()))));
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let reply = match outcome {
            Ok(mut detections) => {
                for det in &mut detections {
                    det.frame_id = frame_id;
                    det.stamp = job.request.stamp;
                }
                debug!(backend = %backend_name, frame_id, count = detections.len(), duration_ms, "frame processed");
                Ok(DetectionResponse {
                    detections,
                    backend_name: backend_name.clone(),
                    duration_ms,
                })
            }
            Err(e) => {
                warn!(backend = %backend_name, frame_id, error = %e, "backend inference failed");
                Err(ServiceError::Inference {
                    backend: backend_name.clone(),
                    frame_id,
                    message: e.to_string(),
                    cause: Some(e),
                })
            }
        };

        if job.reply.send(reply).is_err() {
            debug!(backend = %backend_name, frame_id, "caller stopped waiting, result discarded");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backend panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backend panicked: {s}")
    } else {
        "backend panicked".to_string()
    }
}
