//! The browser-side context: the buffer host and the windows whose
//! surfaces it feeds, owned together.

use crate::config::BridgeConfig;
use crate::connection::{HeadlessCompositor, HeadlessConnection};
use crate::host::{BufferManagerHost, ErrorHandler};
use crate::types::WidgetId;
use crate::window::{WindowError, WindowInitProperties, WindowManager};

#[derive(Debug)]
pub struct WaylandPlatform {
    pub host: BufferManagerHost,
    pub windows: WindowManager,
}

impl WaylandPlatform {
    pub fn new(host: BufferManagerHost, windows: WindowManager) -> Self {
        Self { host, windows }
    }

    /// A platform backed by the in-memory compositor.
    pub fn headless(config: &BridgeConfig, on_error: ErrorHandler) -> (Self, HeadlessCompositor) {
        let (connection, compositor) =
            HeadlessConnection::new(config.host.format_table(), config.host.supports_dmabuf);
        let host = BufferManagerHost::new(Box::new(connection), &config.host, on_error);
        let windows = WindowManager::new(&config.display);
        (Self::new(host, windows), compositor)
    }

    pub fn create_window(
        &mut self,
        properties: WindowInitProperties,
    ) -> Result<WidgetId, WindowError> {
        self.windows.create_window(properties, &mut self.host)
    }

    pub fn show_window(&mut self, widget: WidgetId) -> Result<(), WindowError> {
        self.windows.show(widget, &mut self.host)
    }

    pub fn hide_window(&mut self, widget: WidgetId) -> Result<(), WindowError> {
        self.windows.hide(widget, &mut self.host)
    }

    pub fn destroy_window(&mut self, widget: WidgetId) -> Result<(), WindowError> {
        self.windows.destroy_window(widget, &mut self.host)
    }

    /// Runs one round of the compositor event loop.
    pub fn dispatch_pending_events(&mut self) -> usize {
        self.host.dispatch_pending_events()
    }
}
