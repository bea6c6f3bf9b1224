//! Windows implementation: Win32 enumeration, DPI lookup and
//! PrintWindow capture (works for background windows).

use super::{WindowEntry, WindowRect};
use ghostclick_core::WindowHandle;
use image::RgbaImage;
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::ptr;
use tracing::debug;
use windows_sys::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM, RECT, TRUE};
use windows_sys::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDIBits,
    GetWindowDC, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS,
    SRCCOPY,
};
use windows_sys::Win32::System::ProcessStatus::GetModuleBaseNameW;
use windows_sys::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};
use windows_sys::Win32::UI::HiDpi::GetDpiForWindow;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowRect as WinGetWindowRect, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsWindowVisible, PrintWindow, PW_RENDERFULLCONTENT,
};

pub fn list_windows() -> Vec<WindowEntry> {
    let mut windows: Vec<WindowEntry> = Vec::new();
    unsafe {
        EnumWindows(
            Some(enum_window_callback),
            &mut windows as *mut Vec<WindowEntry> as LPARAM,
        );
    }
    windows
}

unsafe extern "system" fn enum_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam as *mut Vec<WindowEntry>);

    // Invisible and untitled windows are not click targets.
    if IsWindowVisible(hwnd) == 0 || GetWindowTextLengthW(hwnd) == 0 {
        return TRUE;
    }

    if let Some(entry) = window_entry(hwnd as WindowHandle) {
        windows.push(entry);
    }
    TRUE
}

fn window_entry(handle: WindowHandle) -> Option<WindowEntry> {
    unsafe {
        let hwnd = handle as HWND;

        let title = read_window_title(hwnd)?;
        let mut pid: u32 = 0;
        GetWindowThreadProcessId(hwnd, &mut pid);

        Some(WindowEntry {
            handle,
            title,
            process_name: process_name(pid).unwrap_or_default(),
            pid,
            rect: get_window_rect(handle).unwrap_or_default(),
            visible: IsWindowVisible(hwnd) != 0,
        })
    }
}

unsafe fn read_window_title(hwnd: HWND) -> Option<String> {
    let len = GetWindowTextLengthW(hwnd);
    if len == 0 {
        return None;
    }
    let mut buf: Vec<u16> = vec![0; (len + 1) as usize];
    let copied = GetWindowTextW(hwnd, buf.as_mut_ptr(), buf.len() as i32);
    if copied == 0 {
        return None;
    }
    buf.truncate(copied as usize);
    Some(OsString::from_wide(&buf).to_string_lossy().into_owned())
}

fn process_name(pid: u32) -> Option<String> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid);
        if process.is_null() {
            return None;
        }

        let mut buf: Vec<u16> = vec![0; 260];
        let len = GetModuleBaseNameW(process, ptr::null_mut(), buf.as_mut_ptr(), buf.len() as u32);
        CloseHandle(process);

        if len == 0 {
            return None;
        }
        buf.truncate(len as usize);
        Some(OsString::from_wide(&buf).to_string_lossy().into_owned())
    }
}

pub fn get_window_rect(handle: WindowHandle) -> Option<WindowRect> {
    unsafe {
        let mut rect: RECT = std::mem::zeroed();
        if WinGetWindowRect(handle as HWND, &mut rect) == 0 {
            return None;
        }
        Some(WindowRect {
            x: rect.left,
            y: rect.top,
            width: rect.right - rect.left,
            height: rect.bottom - rect.top,
        })
    }
}

/// Monitor scale factor for the window, 96 DPI = 1.0.
pub fn window_scale(handle: WindowHandle) -> f32 {
    let dpi = unsafe { GetDpiForWindow(handle as HWND) };
    if dpi == 0 {
        1.0
    } else {
        dpi as f32 / 96.0
    }
}

/// Capture the full window via PrintWindow, falling back to BitBlt
/// from the window DC when the window refuses WM_PRINT.
pub fn capture_window(handle: WindowHandle) -> Option<RgbaImage> {
    let rect = get_window_rect(handle)?;
    let (width, height) = (rect.width, rect.height);
    if width <= 0 || height <= 0 {
        return None;
    }

    unsafe {
        let hwnd = handle as HWND;
        let window_dc = GetWindowDC(hwnd);
        if window_dc.is_null() {
            return None;
        }
        let mem_dc = CreateCompatibleDC(window_dc);
        let bitmap = CreateCompatibleBitmap(window_dc, width, height);
        let previous = SelectObject(mem_dc, bitmap as _);

        if PrintWindow(hwnd, mem_dc, PW_RENDERFULLCONTENT) == 0 {
            debug!(handle, "PrintWindow failed, falling back to BitBlt");
            BitBlt(mem_dc, 0, 0, width, height, window_dc, 0, 0, SRCCOPY);
        }

        let mut info: BITMAPINFO = std::mem::zeroed();
        info.bmiHeader.biSize = std::mem::size_of::<BITMAPINFOHEADER>() as u32;
        info.bmiHeader.biWidth = width;
        // Negative height: top-down rows, matching image buffer layout.
        info.bmiHeader.biHeight = -height;
        info.bmiHeader.biPlanes = 1;
        info.bmiHeader.biBitCount = 32;
        info.bmiHeader.biCompression = BI_RGB;

        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        let rows = GetDIBits(
            mem_dc,
            bitmap,
            0,
            height as u32,
            pixels.as_mut_ptr() as *mut _,
            &mut info,
            DIB_RGB_COLORS,
        );

        SelectObject(mem_dc, previous);
        DeleteObject(bitmap as _);
        DeleteDC(mem_dc);
        ReleaseDC(hwnd, window_dc);

        if rows == 0 {
            return None;
        }

        // GDI hands back BGRA; alpha of PrintWindow output is unreliable.
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
            px[3] = 255;
        }
        RgbaImage::from_raw(width as u32, height as u32, pixels)
    }
}
