use super::*;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Dmabuf { buffer_id: BufferId, planes: u32 },
    Shm { buffer_id: BufferId, length: u64 },
    Commit(WidgetId, BufferId, Rect),
    Destroy(WidgetId, BufferId),
}

#[derive(Default)]
struct RecordingLink(Arc<Mutex<Vec<Call>>>);

impl HostLink for RecordingLink {
    fn create_dmabuf_buffer(&self, params: DmabufParams, buffer_id: BufferId) {
        self.0.lock().push(Call::Dmabuf {
            buffer_id,
            planes: params.plane_count,
        });
    }

    fn create_shm_buffer(&self, _fd: BufferFd, length: u64, _size: Size, buffer_id: BufferId) {
        self.0.lock().push(Call::Shm { buffer_id, length });
    }

    fn commit_buffer(&self, widget: WidgetId, buffer_id: BufferId, damage: Rect) {
        self.0.lock().push(Call::Commit(widget, buffer_id, damage));
    }

    fn destroy_buffer(&self, widget: WidgetId, buffer_id: BufferId) {
        self.0.lock().push(Call::Destroy(widget, buffer_id));
    }
}

#[derive(Default)]
struct RecordingClient {
    submissions: Mutex<Vec<(BufferId, SwapResult)>>,
    presentations: Mutex<Vec<BufferId>>,
}

impl SurfaceClient for RecordingClient {
    fn on_submission(&self, buffer_id: BufferId, result: SwapResult) {
        self.submissions.lock().push((buffer_id, result));
    }

    fn on_presentation(&self, buffer_id: BufferId, _feedback: PresentationFeedback) {
        self.presentations.lock().push(buffer_id);
    }
}

fn manager() -> (BufferManagerGpu, Arc<Mutex<Vec<Call>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let link = RecordingLink(Arc::clone(&calls));
    let params = InitializeParams {
        formats: crate::formats::default_formats(),
        supports_dmabuf: true,
    };
    let gpu = BufferManagerGpu::new(Box::new(link), Arc::new(SurfaceRegistry::new()), params);
    (gpu, calls)
}

#[test]
fn requests_are_forwarded_in_order() {
    let (gpu, calls) = manager();
    let widget = WidgetId(4);
    let id = gpu.allocate_buffer_id();
    let damage = Rect::new(0, 0, 10, 10);

    gpu.create_shm_based_buffer(BufferFd::invalid(), 400, Size::new(10, 10), id);
    gpu.create_dmabuf_based_buffer(
        BufferFd::invalid(),
        Size::new(10, 10),
        vec![40, 20],
        vec![0, 400],
        vec![0, 0],
        drm::buffer::DrmFourcc::Nv12 as u32,
        2,
        id + 1,
    );
    gpu.commit_buffer(widget, id, damage);
    gpu.destroy_buffer(widget, id);

    assert_eq!(
        *calls.lock(),
        vec![
            Call::Shm {
                buffer_id: id,
                length: 400
            },
            Call::Dmabuf {
                buffer_id: id + 1,
                planes: 2
            },
            Call::Commit(widget, id, damage),
            Call::Destroy(widget, id),
        ]
    );
}

#[test]
fn first_id_is_one() {
    let (gpu, _) = manager();
    assert_eq!(gpu.allocate_buffer_id(), 1);
    assert_eq!(gpu.allocate_buffer_id(), 2);
    assert!(gpu.supports_dmabuf());
    assert!(!gpu.supported_buffer_formats().is_empty());
}

#[test]
fn exhausted_ids_are_never_reused() {
    let (gpu, _) = manager();
    gpu.next_buffer_id.store(u32::MAX - 1, Ordering::Relaxed);
    assert_eq!(gpu.allocate_buffer_id(), u32::MAX - 1);
    assert_eq!(gpu.allocate_buffer_id(), 0);
    assert_eq!(gpu.allocate_buffer_id(), 0);
}

#[test]
fn callbacks_reach_the_registered_client() {
    let (gpu, _) = manager();
    let client = Arc::new(RecordingClient::default());
    gpu.register_surface(WidgetId(1), client.clone());

    gpu.on_submission(WidgetId(1), 3, SwapResult::Ack);
    gpu.on_presentation(WidgetId(1), 3, PresentationFeedback::default());
    gpu.on_submission(WidgetId(2), 4, SwapResult::Ack);

    assert_eq!(*client.submissions.lock(), vec![(3, SwapResult::Ack)]);
    assert_eq!(*client.presentations.lock(), vec![3]);
    assert!(gpu.get_surface(WidgetId(1)).is_some());
}

#[test]
fn events_after_unregister_are_dropped() {
    let (gpu, _) = manager();
    let client = Arc::new(RecordingClient::default());
    gpu.register_surface(WidgetId(1), client.clone());
    gpu.unregister_surface(WidgetId(1));

    gpu.on_submission(WidgetId(1), 3, SwapResult::Skipped);
    assert!(client.submissions.lock().is_empty());
    assert!(gpu.registry().is_empty());
}

/// Unregisters itself from inside the callback.
struct OneShotClient {
    widget: WidgetId,
    registry: Arc<SurfaceRegistry>,
    calls: Mutex<u32>,
}

impl SurfaceClient for OneShotClient {
    fn on_submission(&self, _buffer_id: BufferId, _result: SwapResult) {
        *self.calls.lock() += 1;
        self.registry.unregister(self.widget);
    }

    fn on_presentation(&self, _buffer_id: BufferId, _feedback: PresentationFeedback) {}
}

#[test]
fn client_may_unregister_during_dispatch() {
    let registry = Arc::new(SurfaceRegistry::new());
    let client = Arc::new(OneShotClient {
        widget: WidgetId(9),
        registry: Arc::clone(&registry),
        calls: Mutex::new(0),
    });
    registry.register(WidgetId(9), client.clone());

    for buffer_id in 1..=2 {
        registry.dispatch(GpuEvent::Submission {
            widget: WidgetId(9),
            buffer_id,
            result: SwapResult::Ack,
        });
    }
    assert_eq!(*client.calls.lock(), 1);
    assert_eq!(registry.len(), 0);
}

proptest! {
    #[test]
    fn prop_ids_are_unique_across_threads(threads in 1usize..8, per_thread in 1usize..200) {
        let (gpu, _) = manager();
        let gpu = Arc::new(gpu);

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let gpu = Arc::clone(&gpu);
                std::thread::spawn(move || {
                    (0..per_thread).map(|_| gpu.allocate_buffer_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                prop_assert!(id != 0);
                prop_assert!(seen.insert(id), "id {} handed out twice", id);
            }
        }
        prop_assert_eq!(seen.len(), threads * per_thread);
    }
}
