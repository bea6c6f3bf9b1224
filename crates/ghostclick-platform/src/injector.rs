//! Click injection that never touches the real cursor.
//!
//! On Windows clicks are posted straight to the target window's
//! message queue; on macOS they are CGEvents posted to the owning
//! process. Either way automation keeps working while the window is in
//! the background and the user keeps control of their mouse.

use ghostclick_core::{CapabilityError, ClickAction, InputInjector, WindowHandle};
use tracing::debug;

use crate::error::PlatformError;

/// [`InputInjector`] that posts synthetic mouse events to the window's
/// owner instead of the system-wide event stream.
pub struct GhostClickInjector;

impl InputInjector for GhostClickInjector {
    fn click(
        &self,
        window: WindowHandle,
        x: i32,
        y: i32,
        action: ClickAction,
    ) -> Result<(), CapabilityError> {
        debug!(window, x, y, ?action, "posting click");
        post_click(window, x, y, action)?;
        Ok(())
    }
}

#[cfg(windows)]
fn post_click(
    window: WindowHandle,
    x: i32,
    y: i32,
    action: ClickAction,
) -> Result<(), PlatformError> {
    use windows_sys::Win32::Foundation::{HWND, LPARAM, WPARAM};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        PostMessageW, WM_LBUTTONDBLCLK, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_RBUTTONDOWN, WM_RBUTTONUP,
    };

    const MK_LBUTTON: WPARAM = 0x0001;
    const MK_RBUTTON: WPARAM = 0x0002;

    // Coordinates arrive logical; mouse messages carry physical
    // client coordinates.
    let scale = crate::window::window_scale(window);
    let px = (x as f32 * scale) as i32;
    let py = (y as f32 * scale) as i32;
    let lparam: LPARAM = (((py as isize) << 16) | ((px as isize) & 0xFFFF)) as LPARAM;
    let hwnd = window as HWND;

    let post = |msg: u32, wparam: WPARAM| -> Result<(), PlatformError> {
        let ok = unsafe { PostMessageW(hwnd, msg, wparam, lparam) };
        if ok == 0 {
            return Err(PlatformError::InjectionFailed(format!(
                "PostMessageW({msg:#06x}) to window {window} failed"
            )));
        }
        Ok(())
    };

    match action {
        ClickAction::Click => {
            post(WM_LBUTTONDOWN, MK_LBUTTON)?;
            post(WM_LBUTTONUP, 0)?;
        }
        ClickAction::DoubleClick => {
            post(WM_LBUTTONDOWN, MK_LBUTTON)?;
            post(WM_LBUTTONUP, 0)?;
            post(WM_LBUTTONDBLCLK, MK_LBUTTON)?;
            post(WM_LBUTTONUP, 0)?;
        }
        ClickAction::RightClick => {
            post(WM_RBUTTONDOWN, MK_RBUTTON)?;
            post(WM_RBUTTONUP, 0)?;
        }
    }
    Ok(())
}

// Needs the accessibility permission; without it the events are
// silently dropped by the window server.
#[cfg(target_os = "macos")]
fn post_click(
    window: WindowHandle,
    x: i32,
    y: i32,
    action: ClickAction,
) -> Result<(), PlatformError> {
    use core_graphics::event::{CGEvent, CGEventType, CGMouseButton, EventField};
    use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
    use core_graphics::geometry::CGPoint;

    let rect = crate::window::get_window_rect(window)
        .ok_or_else(|| PlatformError::InjectionFailed(format!("window {window} has no bounds")))?;
    let pid = crate::window::macos::window_pid(window).ok_or_else(|| {
        PlatformError::InjectionFailed(format!("window {window} has no owner process"))
    })?;

    // CGWindow bounds and CGEvent locations share the top-left global
    // coordinate space, both in points.
    let point = CGPoint::new((rect.x + x) as f64, (rect.y + y) as f64);
    let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|_| PlatformError::InjectionFailed("event source unavailable".into()))?;

    let post = |event_type: CGEventType,
                button: CGMouseButton,
                click_state: i64|
     -> Result<(), PlatformError> {
        let event = CGEvent::new_mouse_event(source.clone(), event_type, point, button)
            .map_err(|_| PlatformError::InjectionFailed("event creation failed".into()))?;
        if click_state > 1 {
            event.set_integer_value_field(EventField::MOUSE_EVENT_CLICK_STATE, click_state);
        }
        event.post_to_pid(pid);
        Ok(())
    };

    match action {
        ClickAction::Click => {
            post(CGEventType::LeftMouseDown, CGMouseButton::Left, 1)?;
            post(CGEventType::LeftMouseUp, CGMouseButton::Left, 1)?;
        }
        ClickAction::DoubleClick => {
            post(CGEventType::LeftMouseDown, CGMouseButton::Left, 1)?;
            post(CGEventType::LeftMouseUp, CGMouseButton::Left, 1)?;
            post(CGEventType::LeftMouseDown, CGMouseButton::Left, 2)?;
            post(CGEventType::LeftMouseUp, CGMouseButton::Left, 2)?;
        }
        ClickAction::RightClick => {
            post(CGEventType::RightMouseDown, CGMouseButton::Right, 1)?;
            post(CGEventType::RightMouseUp, CGMouseButton::Right, 1)?;
        }
    }
    Ok(())
}

#[cfg(not(any(windows, target_os = "macos")))]
fn post_click(
    _window: WindowHandle,
    _x: i32,
    _y: i32,
    _action: ClickAction,
) -> Result<(), PlatformError> {
    Err(PlatformError::NotImplemented)
}
