//! Modal editor window.
//!
//! [`run_modal`] drives the editor lifecycle against an [`EditorWindow`]:
//! create the window, open the editor inside it, idle it until the user closes
//! the window, then close the editor before the window goes away. On Windows
//! the window is a plain Win32 top-level window; elsewhere there is no window
//! system to parent an editor and the call returns at once.

use crate::instrument::Instrument;
use std::ffi::c_void;
use std::thread;
use std::time::Duration;

/// Pause between editor idle calls while the window is up.
pub const EDITOR_IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// Initial client size, used until the editor reports its own.
pub const DEFAULT_EDITOR_SIZE: (u32, u32) = (640, 480);

/// Native top-level window that parents a plugin editor.
pub trait EditorWindow {
    /// Creates the (hidden) window and returns its native handle, or `None`
    /// when no window can be created.
    fn create(&mut self, title: &str) -> Option<*mut c_void>;

    /// Sets the client area size.
    fn resize(&mut self, width: u32, height: u32);

    fn show(&mut self);

    /// Handles pending window messages. Returns false once the user asked
    /// for the window to close.
    fn pump(&mut self) -> bool;

    fn destroy(&mut self);
}

/// Runs the editor until its window is closed. Returns whether an editor was
/// shown.
pub fn run_modal(instrument: &mut dyn Instrument, window: &mut dyn EditorWindow, title: &str) -> bool {
    let Some(parent) = window.create(title) else {
        tracing::debug!("no editor window for '{}'", title);
        return false;
    };

    // SAFETY: `parent` stays alive until `destroy`, after `close_editor`.
    let Some((width, height)) = (unsafe { instrument.open_editor(parent) }) else {
        tracing::debug!("'{}' opened no editor", title);
        window.destroy();
        return false;
    };
    if width > 0 && height > 0 {
        window.resize(width, height);
    }
    window.show();
    tracing::info!("editor for '{}' shown ({}x{})", title, width, height);

    while window.pump() {
        instrument.editor_idle();
        thread::sleep(EDITOR_IDLE_INTERVAL);
    }

    instrument.close_editor();
    window.destroy();
    tracing::info!("editor for '{}' closed", title);
    true
}

/// Window for hosts without a window system. Never creates anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl EditorWindow for Headless {
    fn create(&mut self, _title: &str) -> Option<*mut c_void> {
        None
    }

    fn resize(&mut self, _width: u32, _height: u32) {}

    fn show(&mut self) {}

    fn pump(&mut self) -> bool {
        false
    }

    fn destroy(&mut self) {}
}

/// The platform's editor window.
pub fn native_window() -> Box<dyn EditorWindow> {
    #[cfg(windows)]
    {
        Box::new(win32::Win32Window::default())
    }

    #[cfg(not(windows))]
    {
        Box::new(Headless)
    }
}

#[cfg(windows)]
mod win32 {
    use super::{EditorWindow, DEFAULT_EDITOR_SIZE};
    use std::cell::Cell;
    use std::ffi::c_void;
    use windows::core::{w, HSTRING, PCWSTR};
    use windows::Win32::Foundation::{BOOL, HINSTANCE, HWND, LPARAM, LRESULT, RECT, WPARAM};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::WindowsAndMessaging::{
        AdjustWindowRect, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
        PeekMessageW, RegisterClassW, SetWindowPos, ShowWindow, TranslateMessage, CW_USEDEFAULT,
        HMENU, MSG, PM_REMOVE, SWP_NOMOVE, SWP_NOZORDER, SW_SHOW, WINDOW_EX_STYLE, WINDOW_STYLE,
        WM_CLOSE, WNDCLASSW, WS_CAPTION, WS_MINIMIZEBOX, WS_OVERLAPPED, WS_SYSMENU,
    };

    const CLASS_NAME: PCWSTR = w!("vstmidi-editor");

    thread_local! {
        static CLOSE_REQUESTED: Cell<bool> = const { Cell::new(false) };
    }

    fn style() -> WINDOW_STYLE {
        WS_OVERLAPPED | WS_CAPTION | WS_SYSMENU | WS_MINIMIZEBOX
    }

    extern "system" fn window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if msg == WM_CLOSE {
            // The editor has to be closed before the window is destroyed.
            CLOSE_REQUESTED.with(|flag| flag.set(true));
            return LRESULT(0);
        }
        // SAFETY: forwards the message unchanged.
        unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
    }

    #[derive(Default)]
    pub struct Win32Window {
        hwnd: Option<HWND>,
    }

    impl EditorWindow for Win32Window {
        fn create(&mut self, title: &str) -> Option<*mut c_void> {
            // SAFETY: plain Win32 calls on this thread; every handle is checked.
            unsafe {
                let module = GetModuleHandleW(None).ok()?;
                let instance = HINSTANCE(module.0);
                let class = WNDCLASSW {
                    lpfnWndProc: Some(window_proc),
                    hInstance: instance,
                    lpszClassName: CLASS_NAME,
                    ..Default::default()
                };
                // Zero when already registered by an earlier call.
                RegisterClassW(&class);

                let (width, height) = DEFAULT_EDITOR_SIZE;
                let hwnd = CreateWindowExW(
                    WINDOW_EX_STYLE::default(),
                    CLASS_NAME,
                    &HSTRING::from(title),
                    style(),
                    CW_USEDEFAULT,
                    CW_USEDEFAULT,
                    width as i32,
                    height as i32,
                    HWND(0),
                    HMENU(0),
                    instance,
                    None,
                );
                if hwnd.0 == 0 {
                    tracing::warn!("could not create editor window");
                    return None;
                }
                CLOSE_REQUESTED.with(|flag| flag.set(false));
                self.hwnd = Some(hwnd);
                Some(hwnd.0 as *mut c_void)
            }
        }

        fn resize(&mut self, width: u32, height: u32) {
            let Some(hwnd) = self.hwnd else {
                return;
            };
            let mut rect = RECT {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            };
            // SAFETY: `hwnd` is the live window created above.
            unsafe {
                let _ = AdjustWindowRect(&mut rect, style(), BOOL(0));
                let _ = SetWindowPos(
                    hwnd,
                    HWND(0),
                    0,
                    0,
                    rect.right - rect.left,
                    rect.bottom - rect.top,
                    SWP_NOMOVE | SWP_NOZORDER,
                );
            }
        }

        fn show(&mut self) {
            if let Some(hwnd) = self.hwnd {
                // SAFETY: `hwnd` is the live window created above.
                unsafe {
                    let _ = ShowWindow(hwnd, SW_SHOW);
                }
            }
        }

        fn pump(&mut self) -> bool {
            if self.hwnd.is_none() {
                return false;
            }
            let mut msg = MSG::default();
            // SAFETY: standard message loop on the window's own thread.
            unsafe {
                while PeekMessageW(&mut msg, HWND(0), 0, 0, PM_REMOVE).as_bool() {
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
            !CLOSE_REQUESTED.with(Cell::get)
        }

        fn destroy(&mut self) {
            if let Some(hwnd) = self.hwnd.take() {
                // SAFETY: the handle is taken, so it is destroyed once.
                unsafe {
                    let _ = DestroyWindow(hwnd);
                }
            }
        }
    }

    impl Drop for Win32Window {
        fn drop(&mut self) {
            self.destroy();
        }
    }
}
