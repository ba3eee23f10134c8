//! Window Management for shared-buffer surfaces
//!
//! Every window owns one compositor surface, and its widget id is that
//! surface's id. Windows translate show/hide and scale changes into
//! compositor requests and buffer host calls:
//! - toplevels get a shell role object while shown
//! - popups and menus are anchored to a parent window and placed in its
//!   local coordinates, since clients never learn global positions
//! - tooltips are subsurfaces of whichever window has focus
//!
//! Hiding always resets the surface contents on the host, so buffers are
//! released without waiting for a frame callback that may never come.

pub mod output;


pub use output::{Output, OutputManager};

use crate::config::DisplayConfig;
use crate::connection::{ShellHandle, SubsurfaceHandle, SurfaceHandle};
use crate::geometry::{
    translate_bounds_to_parent_coordinates, translate_bounds_to_top_level_coordinates, Rect,
};
use crate::host::BufferManagerHost;
use crate::types::WidgetId;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Failed to create a compositor surface")]
    SurfaceCreationFailed,

    #[error("Failed to create the {0} role object")]
    ShellCreationFailed(&'static str),

    #[error("No parent window available for {0}")]
    NoParent(WidgetId),

    #[error("Unknown window {0}")]
    UnknownWindow(WidgetId),

    #[error("Buffer scale must be positive, got {0}")]
    InvalidScale(i32),
}

/// Window type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Toplevel,
    Bubble,
    Popup,
    Menu,
    Tooltip,
}

impl WindowKind {
    /// Popups and menus are positioned by the compositor against a parent.
    pub fn is_popup(self) -> bool {
        matches!(self, WindowKind::Popup | WindowKind::Menu)
    }
}

#[derive(Debug, Clone)]
pub struct WindowInitProperties {
    pub kind: WindowKind,
    /// Initial bounds in DIP.
    pub bounds: Rect,
    /// Requested parent. Popups fall back to the focused window.
    pub parent: Option<WidgetId>,
}

impl WindowInitProperties {
    pub fn toplevel(bounds: Rect) -> Self {
        Self {
            kind: WindowKind::Toplevel,
            bounds,
            parent: None,
        }
    }

    pub fn popup(bounds: Rect, parent: Option<WidgetId>) -> Self {
        Self {
            kind: WindowKind::Popup,
            bounds,
            parent,
        }
    }

    pub fn menu(bounds: Rect, parent: Option<WidgetId>) -> Self {
        Self {
            kind: WindowKind::Menu,
            bounds,
            parent,
        }
    }

    pub fn tooltip(bounds: Rect) -> Self {
        Self {
            kind: WindowKind::Tooltip,
            bounds,
            parent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaylandWindow {
    widget: WidgetId,
    kind: WindowKind,
    surface: SurfaceHandle,
    bounds_px: Rect,
    buffer_scale: i32,
    ui_scale: f32,
    parent: Option<WidgetId>,
    child: Option<WidgetId>,
    shell: Option<ShellHandle>,
    tooltip_subsurface: Option<SubsurfaceHandle>,
    entered_outputs: BTreeSet<u32>,
}

impl WaylandWindow {
    fn new(widget: WidgetId, kind: WindowKind, surface: SurfaceHandle, bounds: Rect) -> Self {
        // Bounds start in DIP, which equals pixels at the initial scale of 1.
        Self {
            widget,
            kind,
            surface,
            bounds_px: bounds,
            buffer_scale: 1,
            ui_scale: 1.0,
            parent: None,
            child: None,
            shell: None,
            tooltip_subsurface: None,
            entered_outputs: BTreeSet::new(),
        }
    }

    pub fn widget(&self) -> WidgetId {
        self.widget
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn bounds(&self) -> Rect {
        self.bounds_px
    }

    pub fn buffer_scale(&self) -> i32 {
        self.buffer_scale
    }

    pub fn ui_scale(&self) -> f32 {
        self.ui_scale
    }

    pub fn parent(&self) -> Option<WidgetId> {
        self.parent
    }

    pub fn child(&self) -> Option<WidgetId> {
        self.child
    }

    pub fn tooltip_subsurface(&self) -> Option<SubsurfaceHandle> {
        self.tooltip_subsurface
    }

    pub fn entered_outputs(&self) -> &BTreeSet<u32> {
        &self.entered_outputs
    }

    pub fn is_visible(&self) -> bool {
        self.shell.is_some() || self.tooltip_subsurface.is_some()
    }

    fn has_shell_popup(&self) -> bool {
        self.kind.is_popup() && self.shell.is_some()
    }
}

/// Owns every window of the platform and tracks focus and outputs.
#[derive(Debug)]
pub struct WindowManager {
    windows: HashMap<WidgetId, WaylandWindow>,
    focused: Option<WidgetId>,
    outputs: OutputManager,
}

impl WindowManager {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            windows: HashMap::new(),
            focused: None,
            outputs: OutputManager::new(config),
        }
    }

    pub fn window(&self, widget: WidgetId) -> Option<&WaylandWindow> {
        self.windows.get(&widget)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn focused(&self) -> Option<WidgetId> {
        self.focused
    }

    pub fn set_focused(&mut self, widget: Option<WidgetId>) {
        self.focused = widget.filter(|w| self.windows.contains_key(w));
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut OutputManager {
        &mut self.outputs
    }

    /// Creates the window's surface and registers it with the host.
    pub fn create_window(
        &mut self,
        properties: WindowInitProperties,
        host: &mut BufferManagerHost,
    ) -> Result<WidgetId, WindowError> {
        let surface = host
            .connection_mut()
            .create_surface()
            .ok_or(WindowError::SurfaceCreationFailed)?;
        let widget = WidgetId(surface.0);
        let mut window = WaylandWindow::new(widget, properties.kind, surface, properties.bounds);

        if properties.kind.is_popup() {
            let Some(parent) = self.resolve_parent(properties.parent) else {
                warn!("⚠️ No parent window for popup {}", widget);
                host.connection_mut().destroy_surface(surface);
                return Err(WindowError::NoParent(widget));
            };
            window.parent = Some(parent);
        }

        self.windows.insert(widget, window);
        host.on_window_added(widget, surface);
        debug!("created {:?} window {}", properties.kind, widget);

        // The caller never sees the id of a window that failed to come up.
        if let Err(err) = self.initialize_window(widget, host) {
            warn!("⚠️ Window {} failed to initialize: {}", widget, err);
            if let Err(cleanup) = self.destroy_window(widget, host) {
                debug!("cleanup of window {} failed: {}", widget, cleanup);
            }
            return Err(err);
        }
        Ok(widget)
    }

    fn initialize_window(
        &mut self,
        widget: WidgetId,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        if let Some(parent) = self.windows.get(&widget).and_then(|w| w.parent) {
            // Popups need their scale before they can be positioned.
            let (parent_scale, parent_ui_scale) = self.scales_of(parent)?;
            self.set_buffer_scale(widget, parent_scale, false, host)?;
            self.window_mut(widget)?.ui_scale = parent_ui_scale;
            self.create_shell_popup(widget, host)?;
        }

        self.update_buffer_scale(widget, false, host)?;
        host.connection_mut().flush();
        Ok(())
    }

    pub fn show(&mut self, widget: WidgetId, host: &mut BufferManagerHost) -> Result<(), WindowError> {
        let window = self.window(widget).ok_or(WindowError::UnknownWindow(widget))?;
        let (kind, surface, has_shell) = (window.kind, window.surface, window.shell.is_some());

        if kind == WindowKind::Tooltip {
            return self.show_tooltip(widget, host);
        }
        self.focused = Some(widget);

        if kind.is_popup() {
            if !has_shell {
                // Re-shown popups hold pixel bounds from the last configure;
                // the popup is positioned from DIP.
                let window = self.window_mut(widget)?;
                window.bounds_px = window.bounds_px.scale_to_rounded(1.0 / window.ui_scale);
                self.create_shell_popup(widget, host)?;
                host.connection_mut().flush();
            }
        } else if !has_shell {
            let shell = host
                .connection_mut()
                .create_toplevel(surface)
                .ok_or(WindowError::ShellCreationFailed("toplevel"))?;
            self.window_mut(widget)?.shell = Some(shell);
            host.connection_mut().flush();
        }

        self.update_buffer_scale(widget, false, host)
    }

    pub fn hide(&mut self, widget: WidgetId, host: &mut BufferManagerHost) -> Result<(), WindowError> {
        let window = self.window_mut(widget)?;

        if window.kind == WindowKind::Tooltip {
            if let Some(subsurface) = window.tooltip_subsurface.take() {
                host.connection_mut().destroy_subsurface(subsurface);
            }
        } else {
            if let Some(child) = window.child {
                self.hide(child, host)?;
            }
            let window = self.window_mut(widget)?;
            let shell = window.shell.take();
            let popup_parent = window.kind.is_popup().then_some(window.parent).flatten();
            if let Some(shell) = shell {
                host.connection_mut().destroy_shell_object(shell);
                if let Some(parent) = popup_parent.and_then(|p| self.windows.get_mut(&p)) {
                    parent.child = None;
                }
            }
            if self.focused == Some(widget) {
                self.focused = popup_parent;
            }
        }

        // Detach the buffer so the compositor releases it now.
        host.reset_surface_contents(widget);
        debug!("hid window {}", widget);
        Ok(())
    }

    /// Hides the window, destroys its surface and unregisters it from the host.
    pub fn destroy_window(
        &mut self,
        widget: WidgetId,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        self.hide(widget, host)?;
        let window = self
            .windows
            .remove(&widget)
            .ok_or(WindowError::UnknownWindow(widget))?;

        if let Some(parent) = window.parent.and_then(|p| self.windows.get_mut(&p)) {
            if parent.child == Some(widget) {
                parent.child = None;
            }
        }
        if let Some(child) = window.child.and_then(|c| self.windows.get_mut(&c)) {
            child.parent = None;
        }
        if self.focused == Some(widget) {
            self.focused = None;
        }

        host.on_window_removed(widget);
        host.connection_mut().destroy_surface(window.surface);
        host.connection_mut().flush();
        info!("🗑️ Destroyed window {}", widget);
        Ok(())
    }

    /// Stores new pixel bounds.
    pub fn set_bounds(&mut self, widget: WidgetId, bounds_px: Rect) -> Result<(), WindowError> {
        self.window_mut(widget)?.bounds_px = bounds_px;
        Ok(())
    }

    /// Changes the buffer scale. With `update_bounds` the DIP bounds are
    /// kept and the pixel bounds follow the new scale.
    pub fn set_buffer_scale(
        &mut self,
        widget: WidgetId,
        new_scale: i32,
        update_bounds: bool,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        if new_scale <= 0 {
            return Err(WindowError::InvalidScale(new_scale));
        }
        let window = self.window_mut(widget)?;
        if window.buffer_scale == new_scale {
            return Ok(());
        }

        let old_scale = window.buffer_scale;
        window.buffer_scale = new_scale;
        if update_bounds {
            let bounds_dip = window.bounds_px.scale_to_rounded(1.0 / old_scale as f32);
            window.bounds_px = bounds_dip.scale_to_rounded(new_scale as f32);
        }
        debug!("{} buffer scale {} -> {}", widget, old_scale, new_scale);

        let surface = window.surface;
        host.connection_mut().set_buffer_scale(surface, new_scale);
        host.connection_mut().flush();
        Ok(())
    }

    /// Takes the parent's scales, or those of the output the window is on.
    pub fn update_buffer_scale(
        &mut self,
        widget: WidgetId,
        update_bounds: bool,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        let window = self.window(widget).ok_or(WindowError::UnknownWindow(widget))?;
        let (new_scale, ui_scale) = match window.parent {
            Some(parent) => self.scales_of(parent)?,
            None => {
                let output = self.outputs.preferred_output(&window.entered_outputs);
                (output.scale_factor, self.outputs.ui_scale(&output))
            }
        };
        self.window_mut(widget)?.ui_scale = ui_scale;
        self.set_buffer_scale(widget, new_scale, update_bounds, host)
    }

    /// The surface entered an output. Popups follow their parent instead.
    pub fn enter_output(
        &mut self,
        widget: WidgetId,
        output_id: u32,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        let window = self.window_mut(widget)?;
        if window.has_shell_popup() {
            return Ok(());
        }
        window.entered_outputs.insert(output_id);
        self.update_buffer_scale(widget, true, host)
    }

    pub fn leave_output(
        &mut self,
        widget: WidgetId,
        output_id: u32,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        let window = self.window_mut(widget)?;
        if window.has_shell_popup() {
            return Ok(());
        }
        // A leave may arrive without a matching enter after output switches.
        window.entered_outputs.remove(&output_id);
        self.update_buffer_scale(widget, true, host)
    }

    /// Applies bounds chosen by the compositor for a popup.
    ///
    /// A menu flipped above its toplevel parent comes back with a negative
    /// y. The toplevel is then shifted down by that amount instead, so the
    /// menu sits at y = 0 in top-level coordinates. Nested menus are given
    /// relative to their parent menu and are translated to top-level
    /// coordinates.
    pub fn handle_popup_configure(
        &mut self,
        widget: WidgetId,
        bounds_dip: Rect,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        let parent = self
            .window(widget)
            .ok_or(WindowError::UnknownWindow(widget))?
            .parent
            .ok_or(WindowError::NoParent(widget))?;
        let (parent_scale, _) = self.scales_of(parent)?;
        self.set_buffer_scale(widget, parent_scale, true, host)?;

        let buffer_scale = parent_scale;
        let mut new_bounds_dip = bounds_dip;
        let parent_window = self.window_mut(parent)?;
        if !parent_window.has_shell_popup() {
            let mut parent_bounds = parent_window.bounds_px;
            if new_bounds_dip.y < 0 {
                parent_bounds.y = -(new_bounds_dip.y * buffer_scale);
                new_bounds_dip.y = 0;
            } else {
                parent_bounds.y = 0;
            }
            parent_window.bounds_px = parent_bounds;
        } else {
            let bounds_px = new_bounds_dip.scale_to_rounded(buffer_scale as f32);
            new_bounds_dip =
                translate_bounds_to_top_level_coordinates(bounds_px, parent_window.bounds_px)
                    .scale_to_rounded(1.0 / buffer_scale as f32);
        }

        self.window_mut(widget)?.bounds_px = new_bounds_dip.scale_to_rounded(buffer_scale as f32);
        Ok(())
    }

    /// The outermost ancestor of `widget`.
    pub fn root_parent(&self, widget: WidgetId) -> Option<WidgetId> {
        let mut current = self.windows.get(&widget)?;
        while let Some(parent) = current.parent.and_then(|p| self.windows.get(&p)) {
            current = parent;
        }
        Some(current.widget)
    }

    fn window_mut(&mut self, widget: WidgetId) -> Result<&mut WaylandWindow, WindowError> {
        self.windows
            .get_mut(&widget)
            .ok_or(WindowError::UnknownWindow(widget))
    }

    fn scales_of(&self, widget: WidgetId) -> Result<(i32, f32), WindowError> {
        self.window(widget)
            .map(|w| (w.buffer_scale, w.ui_scale))
            .ok_or(WindowError::UnknownWindow(widget))
    }

    /// A requested parent that already has a child popup hands that child
    /// over as the parent (a submenu hangs off the menu, not the window).
    /// Without a requested parent the focused window is used.
    fn resolve_parent(&self, requested: Option<WidgetId>) -> Option<WidgetId> {
        match requested.and_then(|p| self.windows.get(&p)) {
            Some(parent) => Some(parent.child.unwrap_or(parent.widget)),
            None => self.focused,
        }
    }

    fn create_shell_popup(
        &mut self,
        widget: WidgetId,
        host: &mut BufferManagerHost,
    ) -> Result<(), WindowError> {
        let window = self.window(widget).ok_or(WindowError::UnknownWindow(widget))?;
        if window.bounds_px.is_empty() {
            return Ok(());
        }
        let parent_id = window.parent.ok_or(WindowError::NoParent(widget))?;
        let parent = self
            .window(parent_id)
            .ok_or(WindowError::UnknownWindow(parent_id))?;

        let bounds_px = self.adjust_popup_position(window, parent);
        let surface = window.surface;
        let parent_surface = parent.surface;
        let shell = host
            .connection_mut()
            .create_popup(surface, parent_surface, bounds_px)
            .ok_or(WindowError::ShellCreationFailed("popup"))?;

        self.window_mut(widget)?.shell = Some(shell);
        self.window_mut(parent_id)?.child = Some(widget);
        debug!("popup {} placed at {:?} under {}", widget, bounds_px, parent_id);
        Ok(())
    }

    /// Popup bounds relative to the parent surface, in surface pixels.
    fn adjust_popup_position(&self, window: &WaylandWindow, parent: &WaylandWindow) -> Rect {
        let ui_scale = window.ui_scale;
        let parent_bounds_dip = parent.bounds_px.scale_to_rounded(1.0 / ui_scale);
        let mut new_bounds_dip =
            translate_bounds_to_parent_coordinates(window.bounds_px, parent_bounds_dip);

        // Nested menus that ended up left of their parent menu go back to
        // its right side; the compositor flips them if they do not fit.
        let nested = parent.has_shell_popup() && parent.parent.is_some();
        if nested && new_bounds_dip.x <= 0 {
            new_bounds_dip.x = parent_bounds_dip.width - (new_bounds_dip.width + new_bounds_dip.x);
        }

        new_bounds_dip.scale_to_rounded(ui_scale / window.buffer_scale as f32)
    }

    fn show_tooltip(&mut self, widget: WidgetId, host: &mut BufferManagerHost) -> Result<(), WindowError> {
        // The pointer may have left the window that asked for the tooltip.
        let Some(parent_id) = self.focused.filter(|f| *f != widget) else {
            debug!("no focused window for tooltip {}", widget);
            return Ok(());
        };
        let window = self.window(widget).ok_or(WindowError::UnknownWindow(widget))?;
        if window.tooltip_subsurface.is_some() {
            return Ok(());
        }
        let parent = self
            .window(parent_id)
            .ok_or(WindowError::UnknownWindow(parent_id))?;

        let parent_bounds_dip = parent.bounds_px.scale_to_rounded(1.0 / window.ui_scale);
        let bounds_dip = translate_bounds_to_parent_coordinates(window.bounds_px, parent_bounds_dip);
        let buffer_scale = window.buffer_scale;
        let bounds_px = bounds_dip.scale_to_rounded(window.ui_scale / buffer_scale as f32);
        let (surface, parent_surface) = (window.surface, parent.surface);

        let connection = host.connection_mut();
        let subsurface = connection
            .create_subsurface(surface, parent_surface)
            .ok_or(WindowError::ShellCreationFailed("subsurface"))?;
        connection.set_subsurface_position(
            subsurface,
            bounds_px.x / buffer_scale,
            bounds_px.y / buffer_scale,
        );
        connection.commit(parent_surface);
        connection.flush();

        self.window_mut(widget)?.tooltip_subsurface = Some(subsurface);
        Ok(())
    }
}
