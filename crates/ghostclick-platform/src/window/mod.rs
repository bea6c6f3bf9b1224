//! Window enumeration and selector matching.
//!
//! Platform implementations:
//! - Windows: Win32 API (`windows.rs`), including PrintWindow capture
//! - macOS: Quartz window list (`macos.rs`), CGWindowListCreateImage
//!   capture
//!
//! The scheduler consumes this through [`PlatformWindowLocator`];
//! selector filtering itself is platform-independent and testable.

use ghostclick_core::{WindowHandle, WindowLocator, WindowSelector};
use serde::{Deserialize, Serialize};

#[cfg(windows)]
mod windows;

#[cfg(target_os = "macos")]
pub(crate) mod macos;

/// Information about one top-level window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowEntry {
    /// Platform-specific identifier (HWND / CGWindowID).
    pub handle: WindowHandle,
    pub title: String,
    /// Process name (e.g. "notepad.exe").
    pub process_name: String,
    pub pid: u32,
    pub rect: WindowRect,
    pub visible: bool,
}

/// Window rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// List all visible top-level windows.
pub fn list_windows() -> Vec<WindowEntry> {
    #[cfg(windows)]
    {
        windows::list_windows()
    }
    #[cfg(target_os = "macos")]
    {
        macos::list_windows()
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        Vec::new()
    }
}

/// Get the rectangle of a window by handle.
pub fn get_window_rect(handle: WindowHandle) -> Option<WindowRect> {
    #[cfg(windows)]
    {
        windows::get_window_rect(handle)
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_window_rect(handle)
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        let _ = handle;
        None
    }
}

/// Display scale factor of the window's monitor (1.0 = 96 DPI).
pub fn window_scale(handle: WindowHandle) -> f32 {
    #[cfg(windows)]
    {
        windows::window_scale(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        1.0
    }
}

/// Capture the window contents as an RGBA buffer in physical pixels.
/// Works on minimized/background windows where the platform allows it.
pub(crate) fn capture_window(handle: WindowHandle) -> Option<image::RgbaImage> {
    #[cfg(windows)]
    {
        windows::capture_window(handle)
    }
    #[cfg(target_os = "macos")]
    {
        macos::capture_window(handle)
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        let _ = handle;
        None
    }
}

/// Whether a window satisfies a task's selector. Title and process
/// matches are partial and case-insensitive; an empty pattern matches
/// nothing.
pub fn matches_selector(entry: &WindowEntry, selector: &WindowSelector) -> bool {
    match selector {
        WindowSelector::ByTitle { pattern } => {
            !pattern.is_empty()
                && entry
                    .title
                    .to_lowercase()
                    .contains(&pattern.to_lowercase())
        }
        WindowSelector::ByProcess {
            process_name,
            title_filter,
            ..
        } => {
            let process_ok = !process_name.is_empty()
                && entry
                    .process_name
                    .to_lowercase()
                    .contains(&process_name.to_lowercase());
            let title_ok = title_filter
                .as_ref()
                .map(|f| entry.title.to_lowercase().contains(&f.to_lowercase()))
                .unwrap_or(true);
            process_ok && title_ok
        }
    }
}

/// Filter an enumeration result by selector, preserving order.
/// `window_index` is ignored here; it only applies to single-window
/// lookups.
pub fn filter_windows(windows: Vec<WindowEntry>, selector: &WindowSelector) -> Vec<WindowEntry> {
    windows
        .into_iter()
        .filter(|w| matches_selector(w, selector))
        .collect()
}

/// Pick the single window a selector designates: the nth match for
/// process selectors (per `window_index`), the first for title
/// selectors.
pub fn pick_window(windows: Vec<WindowEntry>, selector: &WindowSelector) -> Option<WindowEntry> {
    let mut matches = filter_windows(windows, selector).into_iter();
    match selector {
        WindowSelector::ByProcess { window_index, .. } => matches.nth(*window_index),
        WindowSelector::ByTitle { .. } => matches.next(),
    }
}

/// All live windows matching the selector.
pub fn find_all_windows(selector: &WindowSelector) -> Vec<WindowEntry> {
    filter_windows(list_windows(), selector)
}

/// The single window the selector designates, if any.
pub fn find_window(selector: &WindowSelector) -> Option<WindowEntry> {
    pick_window(list_windows(), selector)
}

/// [`WindowLocator`] backed by live OS enumeration.
pub struct PlatformWindowLocator;

impl WindowLocator for PlatformWindowLocator {
    fn find_all(&self, selector: &WindowSelector) -> Vec<WindowHandle> {
        find_all_windows(selector)
            .into_iter()
            .map(|w| w.handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(handle: usize, title: &str, process: &str) -> WindowEntry {
        WindowEntry {
            handle,
            title: title.into(),
            process_name: process.into(),
            pid: handle as u32,
            rect: WindowRect::default(),
            visible: true,
        }
    }

    fn sample() -> Vec<WindowEntry> {
        vec![
            entry(1, "main.rs - Code", "Code.exe"),
            entry(2, "lib.rs - Code", "Code.exe"),
            entry(3, "Untitled - Notepad", "notepad.exe"),
        ]
    }

    #[test]
    fn title_match_is_partial_and_case_insensitive() {
        let selector = WindowSelector::ByTitle {
            pattern: "notepad".into(),
        };
        let found = filter_windows(sample(), &selector);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].handle, 3);
    }

    #[test]
    fn empty_title_pattern_matches_nothing() {
        let selector = WindowSelector::ByTitle {
            pattern: String::new(),
        };
        assert!(filter_windows(sample(), &selector).is_empty());
    }

    #[test]
    fn process_match_honors_title_filter() {
        let selector = WindowSelector::ByProcess {
            process_name: "code".into(),
            title_filter: Some("lib.rs".into()),
            window_index: 0,
        };
        let found = filter_windows(sample(), &selector);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].handle, 2);
    }

    #[test]
    fn filter_ignores_window_index_but_pick_uses_it() {
        let selector = WindowSelector::ByProcess {
            process_name: "code.exe".into(),
            title_filter: None,
            window_index: 1,
        };
        assert_eq!(filter_windows(sample(), &selector).len(), 2);
        assert_eq!(pick_window(sample(), &selector).unwrap().handle, 2);

        let out_of_range = WindowSelector::ByProcess {
            process_name: "code.exe".into(),
            title_filter: None,
            window_index: 9,
        };
        assert!(pick_window(sample(), &out_of_range).is_none());
    }

    #[test]
    fn order_is_preserved() {
        let selector = WindowSelector::ByProcess {
            process_name: "code.exe".into(),
            title_filter: None,
            window_index: 0,
        };
        let found = filter_windows(sample(), &selector);
        let handles: Vec<usize> = found.iter().map(|w| w.handle).collect();
        assert_eq!(handles, vec![1, 2]);
    }
}
