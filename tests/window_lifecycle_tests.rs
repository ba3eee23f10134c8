// Window lifecycle integration tests for wlbridge
//
// Drives toplevels, menus and tooltips through the platform and checks the
// requests that reach the headless compositor.

use wlbridge::config::{BridgeConfig, OutputConfig};
use wlbridge::connection::{ConnectionOp, HeadlessCompositor};
use wlbridge::geometry::Rect;
use wlbridge::window::WindowError;
use wlbridge::{WaylandPlatform, WidgetId, WindowInitProperties};

fn platform() -> (WaylandPlatform, HeadlessCompositor) {
    let mut config = BridgeConfig::default();
    config.display.outputs = vec![
        OutputConfig {
            id: 1,
            scale_factor: 1,
            device_scale_factor: 1.0,
            primary: true,
        },
        OutputConfig {
            id: 2,
            scale_factor: 2,
            device_scale_factor: 2.0,
            primary: false,
        },
    ];
    WaylandPlatform::headless(&config, Box::new(|_: &str| {}))
}

fn open_toplevel(platform: &mut WaylandPlatform, bounds: Rect) -> WidgetId {
    let widget = platform
        .create_window(WindowInitProperties::toplevel(bounds))
        .unwrap();
    platform.show_window(widget).unwrap();
    widget
}

#[test]
fn test_menu_chain_creation_and_teardown() {
    let (mut platform, compositor) = platform();
    let toplevel = open_toplevel(&mut platform, Rect::new(0, 0, 800, 600));

    let menu = platform
        .create_window(WindowInitProperties::menu(
            Rect::new(20, 20, 200, 300),
            Some(toplevel),
        ))
        .unwrap();
    platform.show_window(menu).unwrap();
    let submenu = platform
        .create_window(WindowInitProperties::menu(
            Rect::new(220, 40, 150, 100),
            Some(toplevel),
        ))
        .unwrap();
    platform.show_window(submenu).unwrap();

    // The submenu hangs off the menu, not the toplevel it named.
    assert_eq!(platform.windows.window(submenu).unwrap().parent(), Some(menu));
    assert_eq!(platform.windows.root_parent(submenu), Some(toplevel));
    assert_eq!(platform.windows.focused(), Some(submenu));

    // Closing the menu closes the submenu and hands focus back.
    platform.hide_window(menu).unwrap();
    assert!(!platform.windows.window(submenu).unwrap().is_visible());
    assert_eq!(platform.windows.focused(), Some(toplevel));

    for widget in [submenu, menu, toplevel] {
        platform.destroy_window(widget).unwrap();
        assert!(platform.host.surface(widget).is_none());
    }
    assert!(platform.windows.is_empty());
    assert_eq!(compositor.surface_count(), 0);
}

#[test]
fn test_tooltip_attaches_to_the_focused_window() {
    let (mut platform, compositor) = platform();
    let _first = open_toplevel(&mut platform, Rect::new(0, 0, 400, 300));
    let second = open_toplevel(&mut platform, Rect::new(500, 0, 400, 300));
    let second_surface = platform.windows.window(second).unwrap().surface();

    let tooltip = platform
        .create_window(WindowInitProperties::tooltip(Rect::new(520, 10, 60, 20)))
        .unwrap();
    let tooltip_surface = platform.windows.window(tooltip).unwrap().surface();
    compositor.clear_ops();
    platform.show_window(tooltip).unwrap();

    let ops = compositor.ops();
    assert!(ops.contains(&ConnectionOp::CreateSubsurface {
        surface: tooltip_surface,
        parent: second_surface,
    }));
    assert!(ops.iter().any(|op| matches!(
        op,
        ConnectionOp::SetSubsurfacePosition { x: 20, y: 10, .. }
    )));
    assert_eq!(platform.windows.focused(), Some(second));

    platform.destroy_window(tooltip).unwrap();
    assert!(compositor
        .ops()
        .iter()
        .any(|op| matches!(op, ConnectionOp::DestroySubsurface(_))));
}

#[test]
fn test_moving_to_a_hidpi_output_rescales_the_window() {
    let (mut platform, compositor) = platform();
    let toplevel = open_toplevel(&mut platform, Rect::new(0, 0, 400, 300));
    let surface = platform.windows.window(toplevel).unwrap().surface();
    assert_eq!(platform.windows.window(toplevel).unwrap().buffer_scale(), 1);

    compositor.clear_ops();
    platform
        .windows
        .enter_output(toplevel, 2, &mut platform.host)
        .unwrap();

    let window = platform.windows.window(toplevel).unwrap();
    assert_eq!(window.buffer_scale(), 2);
    assert_eq!(window.ui_scale(), 2.0);
    assert_eq!(window.bounds(), Rect::new(0, 0, 800, 600));
    assert_eq!(
        compositor.ops(),
        vec![ConnectionOp::SetBufferScale { surface, scale: 2 }]
    );

    platform
        .windows
        .leave_output(toplevel, 2, &mut platform.host)
        .unwrap();
    let window = platform.windows.window(toplevel).unwrap();
    assert_eq!(window.buffer_scale(), 1);
    assert_eq!(window.bounds(), Rect::new(0, 0, 400, 300));
}

#[test]
fn test_popup_configure_on_hidpi_parent() {
    let (mut platform, _compositor) = platform();
    let toplevel = open_toplevel(&mut platform, Rect::new(0, 0, 400, 300));
    platform
        .windows
        .enter_output(toplevel, 2, &mut platform.host)
        .unwrap();

    let menu = platform
        .create_window(WindowInitProperties::menu(
            Rect::new(20, 20, 100, 100),
            Some(toplevel),
        ))
        .unwrap();
    assert_eq!(platform.windows.window(menu).unwrap().buffer_scale(), 2);

    // Flipped above the parent by 15 DIP.
    platform
        .windows
        .handle_popup_configure(menu, Rect::new(10, -15, 50, 50), &mut platform.host)
        .unwrap();
    assert_eq!(
        platform.windows.window(menu).unwrap().bounds(),
        Rect::new(20, 0, 100, 100)
    );
    assert_eq!(platform.windows.window(toplevel).unwrap().bounds().y, 30);
}

#[test]
fn test_operations_on_unknown_windows_fail() {
    let (mut platform, _compositor) = platform();
    let ghost = WidgetId(4242);
    assert_eq!(
        platform.show_window(ghost),
        Err(WindowError::UnknownWindow(ghost))
    );
    assert_eq!(
        platform.hide_window(ghost),
        Err(WindowError::UnknownWindow(ghost))
    );
    assert_eq!(
        platform.destroy_window(ghost),
        Err(WindowError::UnknownWindow(ghost))
    );
    assert!(matches!(
        platform.create_window(WindowInitProperties::popup(Rect::new(0, 0, 10, 10), None)),
        Err(WindowError::NoParent(_))
    ));
}
