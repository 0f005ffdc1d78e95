//! Windows session-message backend.
//!
//! A thread owned by the notifier creates a hidden top-level window and pumps
//! its message queue (message-only windows do not receive session broadcasts).
//! `WM_QUERYENDSESSION` is always answered "yes". On `WM_ENDSESSION` the window
//! procedure rings the doorbell and then *does not return* until the
//! coordinator acknowledges or the budget plus [`ACK_GRACE`] runs out: Windows
//! may terminate the process as soon as the procedure returns.
//!
//! Console processes get `CTRL_CLOSE_EVENT` / `CTRL_LOGOFF_EVENT` /
//! `CTRL_SHUTDOWN_EVENT` through the console control handler instead; it follows
//! the same ring-then-hold protocol on the thread Windows creates for it.

use std::ptr;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use windows_sys::Win32::Foundation::{
    BOOL, ERROR_CLASS_ALREADY_EXISTS, FALSE, GetLastError, HWND, LPARAM, LRESULT, TRUE, WPARAM,
};
use windows_sys::Win32::System::Console::{
    CTRL_CLOSE_EVENT, CTRL_LOGOFF_EVENT, CTRL_SHUTDOWN_EVENT, SetConsoleCtrlHandler,
};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::System::Threading::GetCurrentThreadId;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, ENDSESSION_LOGOFF,
    GetMessageW, MSG, PostThreadMessageW, RegisterClassW, TranslateMessage, WM_ENDSESSION,
    WM_QUERYENDSESSION, WM_QUIT, WNDCLASSW,
};

use super::{Backend, Interrupt, Notification, Notifier, ShutdownReason};
use crate::config::TimeBudget;
use crate::error::GuardError;
use crate::executor::Outcome;
use crate::wake::{Doorbell, SessionHold};

/// Extra time an OS callback is held beyond the budget, covering the
/// coordinator's own bookkeeping after the last callback
pub const ACK_GRACE: Duration = Duration::from_millis(500);

const WINDOW_CLASS: &str = "ShutdownGuardSessionWindow";

/// Reachable from the window procedure and the console handler, which
/// receive no user context pointer.
static ACTIVE: Mutex<Option<Arc<SessionHold>>> = parking_lot::const_mutex(None);

fn active_session() -> Option<Arc<SessionHold>> {
    ACTIVE.lock().clone()
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_QUERYENDSESSION => TRUE as LRESULT,
        WM_ENDSESSION => {
            // wParam FALSE: the session end was cancelled by someone else.
            if wparam != 0 {
                let reason = if (lparam as u32) & ENDSESSION_LOGOFF != 0 {
                    ShutdownReason::Logoff
                } else {
                    ShutdownReason::SystemShutdown
                };
                if let Some(session) = active_session() {
                    let _ = session.end_session(reason);
                }
            }
            0
        }
        // SAFETY: forwarding the unmodified arguments we were called with.
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    let reason = match ctrl_type {
        CTRL_CLOSE_EVENT => ShutdownReason::ConsoleClose,
        CTRL_LOGOFF_EVENT => ShutdownReason::Logoff,
        CTRL_SHUTDOWN_EVENT => ShutdownReason::SystemShutdown,
        // Ctrl+C / Ctrl+Break: let the next handler (default: exit) decide
        _ => return FALSE,
    };
    match active_session() {
        Some(session) => {
            let _ = session.end_session(reason);
            TRUE
        }
        None => FALSE,
    }
}

/// Register the class (once per process), create the window, pump messages.
/// Reports the pump thread id, or why the window could not be created.
fn message_loop(ready: mpsc::Sender<Result<u32, String>>) {
    let class = wide(WINDOW_CLASS);
    // SAFETY: plain Win32 calls on this thread; all pointers outlive the calls.
    let hwnd = unsafe {
        let instance = GetModuleHandleW(ptr::null());
        let mut wc: WNDCLASSW = std::mem::zeroed();
        wc.lpfnWndProc = Some(window_proc);
        wc.hInstance = instance;
        wc.lpszClassName = class.as_ptr();
        if RegisterClassW(&wc) == 0 && GetLastError() != ERROR_CLASS_ALREADY_EXISTS {
            let _ = ready.send(Err(format!("RegisterClassW failed: {}", GetLastError())));
            return;
        }
        CreateWindowExW(
            0,
            class.as_ptr(),
            class.as_ptr(),
            0,
            0,
            0,
            0,
            0,
            ptr::null_mut(),
            ptr::null_mut(),
            instance,
            ptr::null(),
        )
    };
    if hwnd.is_null() {
        // SAFETY: no other Win32 call since CreateWindowExW.
        let code = unsafe { GetLastError() };
        let _ = ready.send(Err(format!("CreateWindowExW failed: {code}")));
        return;
    }

    // SAFETY: reading the id of the current thread.
    let thread_id = unsafe { GetCurrentThreadId() };
    let _ = ready.send(Ok(thread_id));

    // SAFETY: standard message pump for a window owned by this thread.
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        loop {
            match GetMessageW(&mut msg, ptr::null_mut(), 0, 0) {
                0 | -1 => break,
                _ => {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
        }
        DestroyWindow(hwnd);
    }
    log::debug!("session message loop exited");
}

struct Armed {
    session: Arc<SessionHold>,
    pump: JoinHandle<()>,
    pump_thread_id: u32,
}

/// Notifier backed by a hidden window and the console control handler
#[derive(Default)]
pub struct SessionMessageNotifier {
    armed: Option<Armed>,
}

impl std::fmt::Debug for SessionMessageNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMessageNotifier")
            .field("armed", &self.armed.is_some())
            .finish()
    }
}

impl SessionMessageNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

struct BellInterrupt(Arc<Doorbell>);

impl Interrupt for BellInterrupt {
    fn interrupt(&self) {
        self.0.cancel();
    }
}

impl Notifier for SessionMessageNotifier {
    fn backend(&self) -> Backend {
        Backend::SessionMessage
    }

    fn arm(&mut self, budget: TimeBudget) -> Result<Box<dyn Interrupt>, GuardError> {
        let unavailable = |e: String| GuardError::unavailable(Backend::SessionMessage, e);

        let session = Arc::new(SessionHold::new(
            Arc::new(Doorbell::new()),
            budget.limit() + ACK_GRACE,
        ));
        {
            let mut active = ACTIVE.lock();
            if active.is_some() {
                return Err(unavailable(
                    "another guard already owns the session listener".to_string(),
                ));
            }
            *active = Some(Arc::clone(&session));
        }

        let (tx, rx) = mpsc::channel();
        let pump = std::thread::Builder::new()
            .name("shutdown-guard-session".to_string())
            .spawn(move || message_loop(tx));
        let pump = match pump {
            Ok(pump) => pump,
            Err(e) => {
                ACTIVE.lock().take();
                return Err(unavailable(format!("cannot spawn message thread: {e}")));
            }
        };
        let pump_thread_id = match rx.recv() {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                ACTIVE.lock().take();
                let _ = pump.join();
                return Err(unavailable(e));
            }
            Err(_) => {
                ACTIVE.lock().take();
                let _ = pump.join();
                return Err(unavailable("message thread exited during setup".to_string()));
            }
        };

        // SAFETY: registering a plain `extern "system"` function pointer.
        if unsafe { SetConsoleCtrlHandler(Some(console_handler), TRUE) } == 0 {
            // No console attached is fine: the window still receives session messages.
            log::debug!("console control handler not installed");
        }

        let interrupt = BellInterrupt(Arc::clone(session.bell()));
        self.armed = Some(Armed {
            session,
            pump,
            pump_thread_id,
        });
        Ok(Box::new(interrupt))
    }

    fn wait_for_shutdown(&mut self) -> Notification {
        match self.armed.as_ref() {
            Some(armed) => armed.session.bell().wait(),
            None => Notification::Lost("session message notifier not armed".to_string()),
        }
    }

    fn acknowledge(&mut self, outcome: Outcome) {
        if let Some(armed) = self.armed.as_ref() {
            log::debug!("releasing session end ({outcome})");
            armed.session.release();
        }
    }

    fn disarm(&mut self) {
        let Some(armed) = self.armed.take() else {
            return;
        };
        // Unblock any OS thread still parked in `end_session`.
        armed.session.release();
        // SAFETY: removing the handler registered in `arm`; posting to a thread we own.
        unsafe {
            SetConsoleCtrlHandler(Some(console_handler), FALSE);
            PostThreadMessageW(armed.pump_thread_id, WM_QUIT, 0, 0);
        }
        // While the session is ending the pump is parked in `end_session`; it
        // exits once released, so joining here cannot hang past the hold time.
        if armed.pump.join().is_err() {
            log::warn!("session message thread panicked");
        }
        ACTIVE.lock().take();
    }
}

impl Drop for SessionMessageNotifier {
    fn drop(&mut self) {
        self.disarm();
    }
}
