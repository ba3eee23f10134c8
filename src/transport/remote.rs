//! Cross-process strategy.
//!
//! The host runs as a service task that owns the [`WaylandPlatform`] and
//! drains a single ordered channel carrying producer requests and local
//! platform tasks. Callbacks travel back over a separate channel to the
//! producer's I/O task, which posts each one to the commit context it was
//! given. Nothing here blocks a caller.
//!
//! ```text
//!  commit ctx ──HostRequest──► host service ──GpuEvent──► gpu I/O task
//!      ▲                        (platform)                     │
//!      └────────────────── TaskRunner::post ◄──────────────────┘
//! ```
//!
//! Each attached producer gets its own connection number and the host
//! serves one of them at a time. Dropping the producer's link tells the host
//! the producer is gone; the host then forgets everything it created. A
//! newer producer replaces the current one outright, so messages from a
//! replaced link are ignored. A fatal error on the host side closes the
//! back-channel, which is how the producer learns about it.

use super::{GpuEvent, HostLink, HostRequest};
use crate::connection::DmabufParams;
use crate::geometry::{Rect, Size};
use crate::gpu::{BufferManagerGpu, SurfaceRegistry};
use crate::platform::WaylandPlatform;
use crate::task::TaskRunner;
use crate::transport::InitializeParams;
use crate::types::{BufferFd, BufferId, WidgetId};
use log::{debug, info, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type PlatformTask = Box<dyn FnOnce(&mut WaylandPlatform) + Send + 'static>;

/// Connection number of an attached producer.
type ProducerId = u64;

static NEXT_PRODUCER: AtomicU64 = AtomicU64::new(1);

enum ServiceMessage {
    Request {
        producer: ProducerId,
        request: HostRequest,
    },
    Task(PlatformTask),
    /// The producer's link was dropped.
    Disconnected(ProducerId),
}

/// Posts work onto the host service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PlatformHandle {
    sender: mpsc::UnboundedSender<ServiceMessage>,
}

impl PlatformHandle {
    /// Runs `task` on the platform after every message queued before it.
    pub fn post(&self, task: impl FnOnce(&mut WaylandPlatform) + Send + 'static) -> bool {
        self.sender
            .send(ServiceMessage::Task(Box::new(task)))
            .is_ok()
    }

    /// Runs `task` on the platform and returns its result, or `None` if the
    /// service has stopped.
    pub async fn run<R>(&self, task: impl FnOnce(&mut WaylandPlatform) -> R + Send + 'static) -> Option<R>
    where
        R: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let posted = self.post(move |platform| {
            let _ = reply.send(task(platform));
        });
        if !posted {
            return None;
        }
        response.await.ok()
    }

    /// Attaches a new producer to the running host. Its callbacks are
    /// posted to `commit_runner`.
    pub async fn connect_producer(&self, commit_runner: TaskRunner) -> Option<RemoteProducer> {
        let params = self
            .run(|platform| platform.host.initialize_params())
            .await?;
        Some(attach_producer(self.sender.clone(), params, commit_runner))
    }
}

impl std::fmt::Debug for ServiceMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMessage::Request { producer, request } => {
                write!(f, "Request({}, {})", producer, request.name())
            }
            ServiceMessage::Task(_) => f.write_str("Task"),
            ServiceMessage::Disconnected(producer) => write!(f, "Disconnected({})", producer),
        }
    }
}

/// The producer's end of the request channel.
pub struct RemoteLink {
    producer: ProducerId,
    sender: mpsc::UnboundedSender<ServiceMessage>,
}

impl RemoteLink {
    fn send(&self, request: HostRequest) {
        let name = request.name();
        let message = ServiceMessage::Request {
            producer: self.producer,
            request,
        };
        if self.sender.send(message).is_err() {
            debug!("host service gone, dropping {}", name);
        }
    }
}

impl Drop for RemoteLink {
    fn drop(&mut self) {
        let _ = self
            .sender
            .send(ServiceMessage::Disconnected(self.producer));
    }
}

impl HostLink for RemoteLink {
    fn create_dmabuf_buffer(&self, params: DmabufParams, buffer_id: BufferId) {
        self.send(HostRequest::CreateDmabufBasedBuffer { params, buffer_id });
    }

    fn create_shm_buffer(&self, fd: BufferFd, length: u64, size: Size, buffer_id: BufferId) {
        self.send(HostRequest::CreateShmBasedBuffer {
            fd,
            length,
            size,
            buffer_id,
        });
    }

    fn commit_buffer(&self, widget: WidgetId, buffer_id: BufferId, damage: Rect) {
        self.send(HostRequest::CommitBuffer {
            widget,
            buffer_id,
            damage,
        });
    }

    fn destroy_buffer(&self, widget: WidgetId, buffer_id: BufferId) {
        self.send(HostRequest::DestroyBuffer { widget, buffer_id });
    }
}

struct HostService {
    platform: WaylandPlatform,
    receiver: mpsc::UnboundedReceiver<ServiceMessage>,
    /// The producer whose buffers the host currently holds.
    producer: Option<ProducerId>,
}

impl HostService {
    async fn run(mut self) -> WaylandPlatform {
        info!("🔌 Host service started");
        while let Some(message) = self.receiver.recv().await {
            trace!("host service handling {:?}", message);
            match message {
                ServiceMessage::Request { producer, request } => {
                    self.handle_request(producer, request)
                }
                ServiceMessage::Task(task) => task(&mut self.platform),
                ServiceMessage::Disconnected(producer) => self.detach(producer),
            }
            self.platform.dispatch_pending_events();
        }
        info!("🔌 Host service stopped");
        self.platform
    }

    fn handle_request(&mut self, producer: ProducerId, request: HostRequest) {
        let request = match request {
            HostRequest::SetBufferManagerGpu(sender) => {
                self.attach(producer, sender);
                return;
            }
            request => request,
        };
        if self.producer != Some(producer) {
            debug!("ignoring {} from replaced producer {}", request.name(), producer);
            return;
        }
        if !self.platform.host.is_connection_alive() {
            trace!("connection dead, ignoring {}", request.name());
            return;
        }
        let name = request.name();
        if let Err(err) = request.apply(&mut self.platform.host) {
            debug!("{} failed: {}", name, err);
        }
    }

    /// Makes `producer` the current one. Whatever the previous producer
    /// left behind, including a fatal error, is cleared first.
    fn attach(&mut self, producer: ProducerId, sender: mpsc::UnboundedSender<GpuEvent>) {
        if let Some(previous) = self.producer.replace(producer) {
            info!("🔌 Producer {} replaces producer {}", producer, previous);
            self.platform.host.clear_internal_state();
        } else {
            info!("🔌 Producer {} connected", producer);
        }
        self.platform.host.set_gpu_sink(Box::new(sender));
    }

    fn detach(&mut self, producer: ProducerId) {
        if self.producer != Some(producer) {
            debug!("replaced producer {} disconnected", producer);
            return;
        }
        info!("🔌 Producer {} disconnected", producer);
        self.producer = None;
        self.platform.host.clear_internal_state();
    }
}

/// Spawns the host service. The returned task yields the platform back
/// once every handle and link is dropped. Must be called inside a tokio
/// runtime.
pub fn spawn_host(platform: WaylandPlatform) -> (PlatformHandle, JoinHandle<WaylandPlatform>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let service = HostService {
        platform,
        receiver,
        producer: None,
    };
    let task = tokio::spawn(service.run());
    (PlatformHandle { sender }, task)
}

/// A producer attached to a host service.
#[derive(Debug)]
pub struct RemoteProducer {
    pub gpu: BufferManagerGpu,
    /// Ends when the back-channel closes.
    pub io_task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct RemoteSession {
    pub gpu: BufferManagerGpu,
    pub gpu_io_task: JoinHandle<()>,
    pub platform: PlatformHandle,
    pub host_task: JoinHandle<WaylandPlatform>,
}

/// Starts a host service for `platform` and connects a producer to it.
/// Callbacks are posted to `commit_runner`. Must be called inside a tokio
/// runtime.
pub fn connect(platform: WaylandPlatform, commit_runner: TaskRunner) -> RemoteSession {
    let params = platform.host.initialize_params();
    let (handle, host_task) = spawn_host(platform);
    let producer = attach_producer(handle.sender.clone(), params, commit_runner);
    RemoteSession {
        gpu: producer.gpu,
        gpu_io_task: producer.io_task,
        platform: handle,
        host_task,
    }
}

fn attach_producer(
    sender: mpsc::UnboundedSender<ServiceMessage>,
    params: InitializeParams,
    commit_runner: TaskRunner,
) -> RemoteProducer {
    let producer = NEXT_PRODUCER.fetch_add(1, Ordering::Relaxed);
    let (event_sender, events) = mpsc::unbounded_channel();
    // Queued ahead of any request the new manager can send.
    let attach = ServiceMessage::Request {
        producer,
        request: HostRequest::SetBufferManagerGpu(event_sender),
    };
    if sender.send(attach).is_err() {
        debug!("host service gone before the producer attached");
    }

    let registry = Arc::new(SurfaceRegistry::new());
    let io_task = tokio::spawn(run_gpu_io(events, Arc::clone(&registry), commit_runner));
    let gpu = BufferManagerGpu::new(
        Box::new(RemoteLink { producer, sender }),
        registry,
        params,
    );
    RemoteProducer { gpu, io_task }
}

async fn run_gpu_io(
    mut events: mpsc::UnboundedReceiver<GpuEvent>,
    registry: Arc<SurfaceRegistry>,
    commit_runner: TaskRunner,
) {
    while let Some(event) = events.recv().await {
        let registry = Arc::clone(&registry);
        if !commit_runner.post(move || registry.dispatch(event)) {
            debug!("commit context gone, stopping producer I/O");
            return;
        }
    }
    debug!("back-channel closed");
}
