//! Browser-side authority over shared buffers.
//!
//! [`BufferManagerHost`] is the only component that talks to the compositor
//! connection. It owns every [`BufferRecord`] and [`SurfaceState`], checks
//! each producer request before acting on it, and reports compositor
//! feedback back through the [`GpuSink`] installed by the transport.
//!
//! Every fatal error funnels through one place, [`BufferManagerHost::fail`],
//! which stores the message once and hands it to the embedder's
//! [`ErrorHandler`]. From then on producer requests are refused with
//! [`BufferError::ConnectionClosed`] until [`BufferManagerHost::clear_internal_state`]
//! resets the connection.

pub mod buffer;
pub mod surface;
mod validation;


pub use buffer::{BufferKind, BufferRecord};
pub use surface::{SurfacePhase, SurfaceState};

use crate::config::HostConfig;
use crate::connection::{
    ConnectionEvent, DmabufParams, SurfaceHandle, WaylandConnection, WlBufferHandle,
};
use crate::error::{BufferError, Severity};
use crate::formats::BufferFormatsWithModifiers;
use crate::geometry::{Rect, Size};
use crate::transport::{GpuSink, InitializeParams};
use crate::types::{BufferFd, BufferId, PresentationFeedback, SwapResult, WidgetId};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use surface::PresentationRoute;

/// Called with the first fatal error message. Expected to terminate the
/// misbehaving producer.
pub type ErrorHandler = Box<dyn FnMut(&str) + Send>;

pub struct BufferManagerHost {
    connection: Box<dyn WaylandConnection>,
    surfaces: HashMap<WidgetId, SurfaceState>,
    /// Buffers not yet claimed by any surface.
    anonymous_buffers: HashMap<BufferId, BufferRecord>,
    formats: BufferFormatsWithModifiers,
    supports_dmabuf: bool,
    shm_bytes_per_pixel: u32,
    error_message: Option<String>,
    on_error: ErrorHandler,
    gpu: Option<Box<dyn GpuSink>>,
}

impl std::fmt::Debug for BufferManagerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManagerHost")
            .field("surfaces", &self.surfaces.len())
            .field("anonymous_buffers", &self.anonymous_buffers.len())
            .field("supports_dmabuf", &self.supports_dmabuf)
            .field("error_message", &self.error_message)
            .field("gpu_connected", &self.gpu.is_some())
            .finish()
    }
}

impl BufferManagerHost {
    /// The advertised format table is what the compositor supports,
    /// narrowed to the formats and modifiers allowed by `config`.
    pub fn new(
        connection: Box<dyn WaylandConnection>,
        config: &HostConfig,
        on_error: ErrorHandler,
    ) -> Self {
        let allowed = config.format_table();
        let formats: BufferFormatsWithModifiers = connection
            .supported_formats()
            .into_iter()
            .filter_map(|(format, modifiers)| {
                let permitted = allowed.get(&format)?;
                let modifiers: Vec<u64> = modifiers
                    .into_iter()
                    .filter(|modifier| permitted.contains(modifier))
                    .collect();
                (!modifiers.is_empty()).then_some((format, modifiers))
            })
            .collect();
        let supports_dmabuf = config.supports_dmabuf && connection.supports_dmabuf();

        info!(
            "📦 Buffer host ready: {} formats, dmabuf {}",
            formats.len(),
            if supports_dmabuf { "enabled" } else { "disabled" }
        );

        Self {
            connection,
            surfaces: HashMap::new(),
            anonymous_buffers: HashMap::new(),
            formats,
            supports_dmabuf,
            shm_bytes_per_pixel: config.shm_bytes_per_pixel,
            error_message: None,
            on_error,
            gpu: None,
        }
    }

    /// Installs the back-channel to the producer.
    pub fn set_gpu_sink(&mut self, sink: Box<dyn GpuSink>) {
        debug!("producer back-channel installed");
        self.gpu = Some(sink);
    }

    pub fn connection_mut(&mut self) -> &mut dyn WaylandConnection {
        self.connection.as_mut()
    }

    pub fn supported_buffer_formats(&self) -> &BufferFormatsWithModifiers {
        &self.formats
    }

    pub fn supports_dmabuf(&self) -> bool {
        self.supports_dmabuf
    }

    /// What the producer is told when it connects.
    pub fn initialize_params(&self) -> InitializeParams {
        InitializeParams {
            formats: self.formats.clone(),
            supports_dmabuf: self.supports_dmabuf,
        }
    }

    pub fn is_connection_alive(&self) -> bool {
        self.error_message.is_none()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn on_window_added(&mut self, widget: WidgetId, surface: SurfaceHandle) {
        debug!("{} registered with surface {:?}", widget, surface);
        self.surfaces
            .insert(widget, SurfaceState::new(widget, surface));
    }

    pub fn on_window_removed(&mut self, widget: WidgetId) {
        let Some(mut surface) = self.surfaces.remove(&widget) else {
            return;
        };
        for record in surface.clear() {
            self.destroy_record(record);
        }
        debug!("{} unregistered", widget);
    }

    pub fn surface(&self, widget: WidgetId) -> Option<&SurfaceState> {
        self.surfaces.get(&widget)
    }

    pub fn surface_phase(&self, widget: WidgetId) -> Option<SurfacePhase> {
        self.surfaces.get(&widget).map(SurfaceState::phase)
    }

    /// Looks a buffer up in the anonymous pool and in every surface.
    pub fn buffer(&self, buffer_id: BufferId) -> Option<&BufferRecord> {
        self.anonymous_buffers.get(&buffer_id).or_else(|| {
            self.surfaces
                .values()
                .find_map(|surface| surface.buffer(buffer_id))
        })
    }

    pub fn anonymous_buffer_count(&self) -> usize {
        self.anonymous_buffers.len()
    }

    /// Removes a buffer from the anonymous pool. A second claim of the same
    /// id returns `None`.
    pub fn pass_anonymous_wl_buffer(&mut self, buffer_id: BufferId) -> Option<BufferRecord> {
        self.anonymous_buffers.remove(&buffer_id)
    }

    pub fn create_buffer_dmabuf(
        &mut self,
        params: DmabufParams,
        buffer_id: BufferId,
    ) -> Result<(), BufferError> {
        self.ensure_alive()?;
        if let Err(err) = self.validate_new_dmabuf(&params, buffer_id) {
            return self.reject(err);
        }

        let mut record = BufferRecord::new(
            buffer_id,
            params.size,
            BufferKind::Dmabuf {
                format: params.format,
                plane_count: params.plane_count,
            },
        );
        record.damage_region = Rect::from_size(params.size);
        self.anonymous_buffers.insert(buffer_id, record);

        debug!(
            "importing dmabuf buffer {} ({}x{}, {} planes)",
            buffer_id, params.size.width, params.size.height, params.plane_count
        );
        self.connection.create_dmabuf_buffer(buffer_id, params);
        self.connection.flush();
        Ok(())
    }

    pub fn create_buffer_shm(
        &mut self,
        fd: BufferFd,
        length: u64,
        size: Size,
        buffer_id: BufferId,
    ) -> Result<(), BufferError> {
        self.ensure_alive()?;
        if let Err(err) = self.validate_new_shm(&fd, length, size, buffer_id) {
            return self.reject(err);
        }

        let Some(wl_buffer) = self.connection.create_shm_buffer(fd, length, size) else {
            return self.reject(BufferError::ShmImportFailed(buffer_id));
        };

        let mut record = BufferRecord::new(buffer_id, size, BufferKind::Shm { length });
        record.set_backing(wl_buffer);
        record.damage_region = Rect::from_size(size);
        self.anonymous_buffers.insert(buffer_id, record);
        debug!(
            "created shm buffer {} ({}x{}, {} bytes)",
            buffer_id, size.width, size.height, length
        );
        Ok(())
    }

    /// Attaches `buffer_id` to the widget's surface and schedules a frame.
    /// Returns as soon as the compositor requests are queued.
    pub fn commit_buffer_with_id(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
        damage: Rect,
    ) -> Result<(), BufferError> {
        self.ensure_alive()?;

        let Some(surface) = self.surfaces.get_mut(&widget) else {
            return self.reject(BufferError::UnknownWidget(widget));
        };
        if let Some(in_flight) = surface.in_flight() {
            return self.reject(BufferError::CommitInFlight {
                widget,
                in_flight,
                buffer_id,
            });
        }
        if !surface.contains(buffer_id) {
            match self.anonymous_buffers.remove(&buffer_id) {
                Some(record) => surface.insert(record),
                None => return self.reject(BufferError::UnknownBuffer(buffer_id)),
            }
        }
        if let Err(err) = surface.begin_commit(buffer_id, damage) {
            return self.reject(err);
        }

        if surface.is_awaiting_backing(buffer_id) {
            debug!(
                "{} commit of buffer {} waits for its dmabuf import",
                widget, buffer_id
            );
            return Ok(());
        }
        self.attach_and_commit(widget, buffer_id);
        Ok(())
    }

    /// Destroys a buffer. A buffer with a commit in flight is only marked;
    /// it goes away once that commit is submitted or cancelled.
    pub fn destroy_buffer_with_id(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
    ) -> Result<(), BufferError> {
        self.ensure_alive()?;

        if let Some(surface) = self.surfaces.get_mut(&widget) {
            if surface.in_flight() == Some(buffer_id) {
                debug!("{} buffer {} in flight, destroy deferred", widget, buffer_id);
                surface.mark_for_destroy(buffer_id);
                return Ok(());
            }
            if let Some(record) = surface.remove(buffer_id) {
                self.destroy_record(record);
                return Ok(());
            }
        }
        if let Some(record) = self.anonymous_buffers.remove(&buffer_id) {
            self.destroy_record(record);
            return Ok(());
        }

        // Buffers of torn-down widgets are already gone.
        debug!("destroy of unknown buffer {} ignored", buffer_id);
        Ok(())
    }

    /// Detaches whatever the surface shows without waiting for the
    /// compositor. A cancelled commit is reported to the producer as
    /// [`SwapResult::Skipped`].
    pub fn reset_surface_contents(&mut self, widget: WidgetId) {
        let Some(surface) = self.surfaces.get_mut(&widget) else {
            return;
        };
        self.connection.attach(surface.surface, None);
        self.connection.commit(surface.surface);
        self.connection.flush();

        let Some(cancelled) = surface.cancel_commit() else {
            return;
        };
        debug!("{} reset, commit of buffer {} cancelled", widget, cancelled);
        let destroy = surface
            .is_marked_for_destroy(cancelled)
            .then(|| surface.remove(cancelled))
            .flatten();
        if let Some(record) = destroy {
            self.destroy_record(record);
        }
        self.notify_submission(widget, cancelled, SwapResult::Skipped);
    }

    /// Drains and handles everything the compositor sent. Handling may
    /// issue new requests whose events are drained in the same call.
    pub fn dispatch_pending_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let events = self.connection.take_pending_events();
            if events.is_empty() {
                return handled;
            }
            for event in events {
                self.handle_connection_event(event);
                handled += 1;
            }
        }
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::DmabufImported { buffer_id, buffer } => {
                self.on_dmabuf_imported(buffer_id, buffer)
            }
            ConnectionEvent::FrameDone { surface, buffer_id } => {
                self.on_frame_done(surface, buffer_id)
            }
            ConnectionEvent::Presented {
                surface,
                buffer_id,
                feedback,
            } => self.on_presented(surface, buffer_id, feedback),
            ConnectionEvent::Discarded { surface, buffer_id } => {
                self.on_presented(surface, buffer_id, PresentationFeedback::failure())
            }
            ConnectionEvent::BufferReleased { buffer } => self.on_buffer_released(buffer),
        }
    }

    /// Forgets everything the lost producer created. Widget registrations
    /// stay, so a new producer can commit to the same windows.
    pub fn clear_internal_state(&mut self) {
        let mut records: Vec<BufferRecord> = self
            .anonymous_buffers
            .drain()
            .map(|(_, record)| record)
            .collect();
        for surface in self.surfaces.values_mut() {
            records.extend(surface.clear());
        }
        let destroyed = records.len();
        for record in records {
            self.destroy_record(record);
        }
        self.connection.flush();

        self.gpu = None;
        self.error_message = None;
        info!("🧹 Producer connection cleared, {} buffers destroyed", destroyed);
    }

    fn validate_new_dmabuf(
        &self,
        params: &DmabufParams,
        buffer_id: BufferId,
    ) -> Result<(), BufferError> {
        self.validate_unused_id(buffer_id)?;
        if !self.supports_dmabuf {
            return Err(BufferError::DmabufNotSupported);
        }
        validation::validate_dmabuf(params, &self.formats)
    }

    fn validate_new_shm(
        &self,
        fd: &BufferFd,
        length: u64,
        size: Size,
        buffer_id: BufferId,
    ) -> Result<(), BufferError> {
        self.validate_unused_id(buffer_id)?;
        validation::validate_shm(fd, length, size, self.shm_bytes_per_pixel)
    }

    fn validate_unused_id(&self, buffer_id: BufferId) -> Result<(), BufferError> {
        validation::validate_buffer_id(buffer_id)?;
        if self.buffer(buffer_id).is_some() {
            return Err(BufferError::DuplicateBufferId(buffer_id));
        }
        Ok(())
    }

    fn ensure_alive(&self) -> Result<(), BufferError> {
        match &self.error_message {
            Some(message) => Err(BufferError::ConnectionClosed(message.clone())),
            None => Ok(()),
        }
    }

    /// Routes a failed request by severity and hands the error back.
    fn reject(&mut self, err: BufferError) -> Result<(), BufferError> {
        match err.severity() {
            Severity::Fatal => self.fail(&err.to_string()),
            Severity::InvalidUsage => warn!("⚠️ Rejected producer request: {}", err),
            Severity::Benign => debug!("ignored producer request: {}", err),
        }
        Err(err)
    }

    /// The single terminal point for fatal errors. Only the first message
    /// reaches the embedder.
    fn fail(&mut self, message: &str) {
        if self.error_message.is_some() {
            return;
        }
        error!("❌ Buffer connection failed: {}", message);
        self.error_message = Some(message.to_string());
        self.gpu = None;
        (self.on_error)(message);
    }

    fn attach_and_commit(&mut self, widget: WidgetId, buffer_id: BufferId) {
        let Some(surface) = self.surfaces.get_mut(&widget) else {
            return;
        };
        let Some(record) = surface.buffer_mut(buffer_id) else {
            return;
        };
        let Some(wl_buffer) = record.wl_buffer else {
            return;
        };
        let damage = record.damage_region;
        record.released = false;

        if let Some(superseded) = surface.mark_attached(buffer_id) {
            debug!("{} buffer {} superseded by {}", widget, superseded, buffer_id);
        }

        let handle = surface.surface;
        self.connection.attach(handle, Some(wl_buffer));
        self.connection.damage_buffer(handle, damage);
        self.connection.request_frame(handle, buffer_id);
        self.connection.request_presentation_feedback(handle, buffer_id);
        self.connection.commit(handle);
        self.connection.flush();
    }

    fn widget_for(&self, surface: SurfaceHandle) -> Option<WidgetId> {
        self.surfaces
            .values()
            .find(|state| state.surface == surface)
            .map(|state| state.widget)
    }

    fn on_dmabuf_imported(&mut self, buffer_id: BufferId, buffer: Option<WlBufferHandle>) {
        let Some(wl_buffer) = buffer else {
            if self.buffer(buffer_id).is_some() {
                self.fail(&BufferError::DmabufImportFailed(buffer_id).to_string());
            } else {
                debug!("import failure for destroyed buffer {} ignored", buffer_id);
            }
            return;
        };

        if let Some(record) = self.anonymous_buffers.get_mut(&buffer_id) {
            record.set_backing(wl_buffer);
            debug!("dmabuf buffer {} imported", buffer_id);
            return;
        }

        let pending_attach = self
            .surfaces
            .values_mut()
            .find(|surface| surface.contains(buffer_id))
            .map(|surface| {
                if let Some(record) = surface.buffer_mut(buffer_id) {
                    record.set_backing(wl_buffer);
                }
                (surface.widget, surface.is_awaiting_backing(buffer_id))
            });

        match pending_attach {
            Some((widget, true)) => {
                debug!("dmabuf buffer {} imported, attaching to {}", buffer_id, widget);
                self.attach_and_commit(widget, buffer_id);
            }
            Some((_, false)) => debug!("dmabuf buffer {} imported", buffer_id),
            None => {
                debug!("buffer {} destroyed before its import finished", buffer_id);
                self.connection.destroy_buffer(wl_buffer);
            }
        }
    }

    fn on_frame_done(&mut self, handle: SurfaceHandle, buffer_id: BufferId) {
        let Some(widget) = self.widget_for(handle) else {
            return;
        };
        let Some(surface) = self.surfaces.get_mut(&widget) else {
            return;
        };
        if !surface.finish_commit(buffer_id) {
            debug!("{} stale frame callback for buffer {}", widget, buffer_id);
            return;
        }

        let held = surface.take_held_presentations(buffer_id);
        let destroy = surface
            .is_marked_for_destroy(buffer_id)
            .then(|| surface.remove(buffer_id))
            .flatten();
        if let Some(record) = destroy {
            debug!("{} running deferred destroy of buffer {}", widget, buffer_id);
            self.destroy_record(record);
        }

        self.notify_submission(widget, buffer_id, SwapResult::Ack);
        for feedback in held {
            self.notify_presentation(widget, buffer_id, feedback);
        }
    }

    fn on_presented(
        &mut self,
        handle: SurfaceHandle,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    ) {
        let Some(widget) = self.widget_for(handle) else {
            return;
        };
        let Some(surface) = self.surfaces.get_mut(&widget) else {
            return;
        };
        match surface.route_presentation(buffer_id) {
            PresentationRoute::Deliver => self.notify_presentation(widget, buffer_id, feedback),
            PresentationRoute::HoldBack => {
                debug!(
                    "{} presentation of buffer {} held until its submission",
                    widget, buffer_id
                );
                surface.hold_presentation(buffer_id, feedback);
            }
            PresentationRoute::Drop => {
                debug!("{} unexpected presentation of buffer {}", widget, buffer_id)
            }
        }
    }

    fn on_buffer_released(&mut self, wl_buffer: WlBufferHandle) {
        let record = self
            .surfaces
            .values_mut()
            .find_map(|surface| surface.buffer_by_backing_mut(wl_buffer));
        if let Some(record) = record {
            record.released = true;
        }
    }

    fn destroy_record(&mut self, record: BufferRecord) {
        if let Some(wl_buffer) = record.wl_buffer {
            self.connection.destroy_buffer(wl_buffer);
        }
    }

    fn notify_submission(&mut self, widget: WidgetId, buffer_id: BufferId, result: SwapResult) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.on_submission(widget, buffer_id, result);
        }
    }

    fn notify_presentation(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    ) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.on_presentation(widget, buffer_id, feedback);
        }
    }
}
