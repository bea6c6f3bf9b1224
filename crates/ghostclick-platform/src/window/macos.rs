//! macOS implementation: Quartz window list and window capture.
//!
//! Enumeration goes through CGWindowListCopyWindowInfo; capture uses
//! CGWindowListCreateImage at nominal resolution, so pixels stay in
//! points and the scale factor is 1.0 regardless of the display.
//! Window titles require the screen-recording permission; without it
//! entries still carry the owner name, so process matching keeps
//! working.

use super::{WindowEntry, WindowRect};
use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::geometry::{CGPoint, CGRect, CGSize};
use core_graphics::window::{
    create_image, kCGNullWindowID, kCGWindowImageBoundsIgnoreFraming,
    kCGWindowImageNominalResolution, kCGWindowListExcludeDesktopElements,
    kCGWindowListOptionIncludingWindow, kCGWindowListOptionOnScreenOnly,
    CGWindowListCopyWindowInfo, CGWindowID,
};
use ghostclick_core::WindowHandle;
use image::RgbaImage;
use std::ffi::c_void;

type WindowInfo = CFDictionary<CFString, *const c_void>;

pub fn list_windows() -> Vec<WindowEntry> {
    let mut windows = Vec::new();
    unsafe {
        let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
        let list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
        if list_ref.is_null() {
            return windows;
        }

        let list: CFArray = CFArray::wrap_under_create_rule(list_ref as _);
        for dict_ptr in &list.get_all_values() {
            let dict: WindowInfo = CFDictionary::wrap_under_get_rule(*dict_ptr as _);
            if let Some(entry) = window_entry(&dict) {
                windows.push(entry);
            }
        }
    }
    windows
}

unsafe fn window_entry(dict: &WindowInfo) -> Option<WindowEntry> {
    // The dock, menu bar and overlays live on non-zero layers.
    if dict_i64(dict, "kCGWindowLayer")? != 0 {
        return None;
    }
    let handle = dict_i64(dict, "kCGWindowNumber")? as WindowHandle;

    Some(WindowEntry {
        handle,
        title: dict_string(dict, "kCGWindowName").unwrap_or_default(),
        process_name: dict_string(dict, "kCGWindowOwnerName").unwrap_or_default(),
        pid: dict_i64(dict, "kCGWindowOwnerPID").unwrap_or(0) as u32,
        rect: dict_rect(dict).unwrap_or_default(),
        visible: true,
    })
}

pub fn get_window_rect(handle: WindowHandle) -> Option<WindowRect> {
    unsafe { window_info(handle).and_then(|dict| dict_rect(&dict)) }
}

/// Owning process of a window, for pid-targeted event posting.
pub fn window_pid(handle: WindowHandle) -> Option<i32> {
    unsafe {
        window_info(handle)
            .and_then(|dict| dict_i64(&dict, "kCGWindowOwnerPID"))
            .map(|pid| pid as i32)
    }
}

unsafe fn window_info(handle: WindowHandle) -> Option<WindowInfo> {
    let list_ref =
        CGWindowListCopyWindowInfo(kCGWindowListOptionIncludingWindow, handle as CGWindowID);
    if list_ref.is_null() {
        return None;
    }
    let list: CFArray = CFArray::wrap_under_create_rule(list_ref as _);
    let values = list.get_all_values();
    let dict_ptr = values.first()?;
    Some(CFDictionary::wrap_under_get_rule(*dict_ptr as _))
}

pub fn capture_window(handle: WindowHandle) -> Option<RgbaImage> {
    // Zero rect: capture the window's own bounds.
    let bounds = CGRect::new(&CGPoint::new(0.0, 0.0), &CGSize::new(0.0, 0.0));
    let image = create_image(
        bounds,
        kCGWindowListOptionIncludingWindow,
        handle as CGWindowID,
        kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution,
    )?;

    let width = image.width() as usize;
    let height = image.height() as usize;
    let bytes_per_row = image.bytes_per_row() as usize;
    let data = image.data();
    rgba_from_bgra_rows(data.bytes(), width, height, bytes_per_row)
}

/// Quartz hands back BGRA rows padded to `bytes_per_row`; repack into
/// a tight RGBA buffer with opaque alpha.
fn rgba_from_bgra_rows(
    bytes: &[u8],
    width: usize,
    height: usize,
    bytes_per_row: usize,
) -> Option<RgbaImage> {
    if width == 0 || height == 0 || bytes_per_row < width * 4 || bytes.len() < bytes_per_row * height
    {
        return None;
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in bytes.chunks_exact(bytes_per_row).take(height) {
        for px in row[..width * 4].chunks_exact(4) {
            pixels.extend_from_slice(&[px[2], px[1], px[0], 255]);
        }
    }
    RgbaImage::from_raw(width as u32, height as u32, pixels)
}

unsafe fn dict_string(dict: &WindowInfo, key: &str) -> Option<String> {
    let value = dict.find(&CFString::new(key))?;
    let string: CFString = CFString::wrap_under_get_rule(*value as _);
    Some(string.to_string())
}

unsafe fn dict_i64(dict: &WindowInfo, key: &str) -> Option<i64> {
    let value = dict.find(&CFString::new(key))?;
    let number: CFNumber = CFNumber::wrap_under_get_rule(*value as _);
    number.to_i64()
}

unsafe fn dict_rect(dict: &WindowInfo) -> Option<WindowRect> {
    let value = dict.find(&CFString::new("kCGWindowBounds"))?;
    let bounds: CFDictionary = CFDictionary::wrap_under_get_rule(*value as _);
    let rect = CGRect::from_dict_representation(&bounds)?;
    Some(WindowRect {
        x: rect.origin.x as i32,
        y: rect.origin.y as i32,
        width: rect.size.width as i32,
        height: rect.size.height as i32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repacks_padded_bgra_rows() {
        // 2x2, 12-byte rows (4 bytes of padding per row).
        let mut bytes = Vec::new();
        for row in 0..2u8 {
            for col in 0..2u8 {
                bytes.extend_from_slice(&[10 + col, 20 + row, 30, 0]);
            }
            bytes.extend_from_slice(&[0xEE; 4]);
        }

        let img = rgba_from_bgra_rows(&bytes, 2, 2, 12).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        // BGRA [10, 20, 30, 0] becomes RGBA [30, 20, 10, 255].
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [30, 21, 11, 255]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(rgba_from_bgra_rows(&[0; 8], 2, 2, 8).is_none());
        assert!(rgba_from_bgra_rows(&[], 0, 0, 0).is_none());
    }
}
