//! The emulated console.
//!
//! Two threads share one [`ConsoleState`]: the event thread, which owns the
//! [`Display`], presents the framebuffer and feeds host keystrokes into the
//! input queue; and the image thread, which services the guest's text and
//! graphics protocol calls through a [`ConsoleHandle`]. Cursor, attribute
//! and queue sit behind a single mutex. The framebuffer is atomics only, so
//! presenting never blocks guest output.

pub mod display;
pub mod font;
pub mod protocols;
pub mod queue;
pub mod screen;
pub mod terminal;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use uefi::protocol::simple_text_input::InputKey;

use self::display::{Display, HostEvent};
use self::queue::KeyQueue;
use self::screen::{COLUMNS, Framebuffer, ROWS, TextCursor};

/// How long the event thread waits for host input per iteration.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Frames are re-presented at least this often, to pick up pixels the guest
/// wrote straight into the framebuffer.
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Callback run on the event thread when the host asks to quit.
pub type QuitCallback = Box<dyn FnMut() + Send>;

struct TextState {
    cursor: TextCursor,
    keys: KeyQueue,
}

/// State shared between the event thread and the image thread.
pub struct ConsoleState {
    framebuffer: Framebuffer,
    text: Mutex<TextState>,
    keep_running: AtomicBool,
    interactive: bool,
}

impl ConsoleState {
    fn text(&self) -> MutexGuard<'_, TextState> {
        // Text state stays consistent across a panic in a critical section.
        self.text.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_key(&self, key: InputKey) {
        if !self.text().keys.push(key) {
            log::trace!("input queue full, dropped {key:?}");
        }
    }
}

/// The image thread's view of the console.
#[derive(Clone)]
pub struct ConsoleHandle {
    state: Arc<ConsoleState>,
}

impl ConsoleHandle {
    /// The framebuffer exposed through Graphics Output.
    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.state.framebuffer
    }

    /// Renders `text` at the cursor.
    pub fn output(&self, text: &[u16]) {
        let mut guard = self.state.text();
        screen::write(&self.state.framebuffer, &mut guard.cursor, text);
    }

    /// Homes the cursor, restores the default attribute and clears.
    pub fn reset_output(&self) {
        let mut guard = self.state.text();
        guard.cursor = TextCursor::HOME;
        screen::clear(&self.state.framebuffer, &mut guard.cursor);
    }

    /// Clears to the current background and homes the cursor.
    pub fn clear(&self) {
        let mut guard = self.state.text();
        screen::clear(&self.state.framebuffer, &mut guard.cursor);
    }

    /// Sets the attribute used by subsequent output.
    pub fn set_attribute(&self, attribute: u8) {
        self.state.text().cursor.attribute = attribute;
    }

    /// Moves the cursor, returning `false` if the position is off screen.
    pub fn set_cursor(&self, column: usize, row: usize) -> bool {
        if column >= COLUMNS || row >= ROWS {
            return false;
        }
        let mut guard = self.state.text();
        guard.cursor.column = column;
        guard.cursor.row = row;
        true
    }

    /// Current cursor and attribute.
    #[must_use]
    pub fn cursor(&self) -> TextCursor {
        self.state.text().cursor
    }

    /// Takes the oldest pending keystroke, if any.
    #[must_use]
    pub fn read_key(&self) -> Option<InputKey> {
        self.state.text().keys.pop()
    }

    /// Returns `true` if a keystroke is waiting.
    #[must_use]
    pub fn key_pending(&self) -> bool {
        !self.state.text().keys.is_empty()
    }

    /// Discards pending keystrokes.
    pub fn reset_input(&self) {
        self.state.text().keys.clear();
    }

    /// Queues a keystroke, dropping it if the queue is full.
    pub fn push_key(&self, key: InputKey) {
        self.state.push_key(key);
    }

    /// Returns `false` once the console is shutting down.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.keep_running.load(Ordering::Acquire)
    }
}

/// The running console: shared state plus the event thread.
pub struct Console {
    handle: ConsoleHandle,
    thread: Option<JoinHandle<()>>,
}

impl Console {
    /// Starts the event thread on `display`.
    ///
    /// `on_quit` runs on the event thread, not the caller's, when the host
    /// asks to close the emulator or the display stops working.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(display: Box<dyn Display>, on_quit: QuitCallback) -> io::Result<Self> {
        let state = Arc::new(ConsoleState {
            framebuffer: Framebuffer::new(),
            text: Mutex::new(TextState {
                cursor: TextCursor::HOME,
                keys: KeyQueue::new(),
            }),
            keep_running: AtomicBool::new(true),
            interactive: display.is_interactive(),
        });
        let shared = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("uemu-console".into())
            .spawn(move || event_loop(&shared, display, on_quit))?;
        Ok(Self {
            handle: ConsoleHandle { state },
            thread: Some(thread),
        })
    }

    /// A handle for servicing guest calls.
    #[must_use]
    pub fn handle(&self) -> ConsoleHandle {
        self.handle.clone()
    }

    /// Blocks until a key is pressed, for inspecting the final screen.
    ///
    /// Returns immediately on a display nobody can type into.
    pub fn pause(&self) {
        if !self.handle.state.interactive {
            return;
        }
        self.handle.reset_input();
        while self.handle.is_running() && self.handle.read_key().is_none() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stops the event thread and waits for it to restore the display.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.handle.state.keep_running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("console thread panicked");
            }
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(state: &ConsoleState, mut display: Box<dyn Display>, mut on_quit: QuitCallback) {
    let mut frame = Vec::new();
    let mut shown = 0;
    let mut last_present: Option<Instant> = None;
    let mut quit_requested = false;
    let mut lost = false;

    while state.keep_running.load(Ordering::Acquire) {
        let generation = state.framebuffer.generation();
        let stale = last_present.is_none_or(|at| at.elapsed() >= REFRESH_INTERVAL);
        if generation != shown || stale {
            state.framebuffer.snapshot(&mut frame);
            if let Err(err) = display.present(&frame) {
                log::error!("display failed: {err}");
                lost = true;
                break;
            }
            shown = generation;
            last_present = Some(Instant::now());
        }

        match display.poll_event(POLL_INTERVAL) {
            Ok(Some(HostEvent::Key(key))) => state.push_key(key),
            Ok(Some(HostEvent::Quit)) if !quit_requested => {
                quit_requested = true;
                on_quit();
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("reading host input failed: {err}");
                lost = true;
                break;
            }
        }
    }

    // Nothing feeds the key queue from here on; waiters must not block on it.
    state.keep_running.store(false, Ordering::Release);
    if lost && !quit_requested {
        on_quit();
    }

    if let Err(err) = display.close() {
        log::warn!("failed to close display: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use display::HeadlessDisplay;
    use std::sync::mpsc;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn scripted_keys_reach_the_queue_in_order() {
        let keys = [InputKey::char(u16::from(b'a')), InputKey::char(u16::from(b'b'))];
        let display = HeadlessDisplay::scripted(keys.map(HostEvent::Key));
        let console = Console::start(Box::new(display), Box::new(|| {})).unwrap();
        let handle = console.handle();

        let mut seen = Vec::new();
        assert!(wait_until(|| {
            seen.extend(handle.read_key());
            seen.len() == 2
        }));
        assert_eq!(seen, keys);
        console.shutdown();
    }

    #[test]
    fn reset_input_leaves_nothing_to_read() {
        let console = Console::start(Box::new(HeadlessDisplay::new()), Box::new(|| {})).unwrap();
        let handle = console.handle();
        for i in 0..20u8 {
            handle.push_key(InputKey::char(u16::from(b'a' + i)));
        }
        assert!(handle.key_pending());
        handle.reset_input();
        assert!(!handle.key_pending());
        assert_eq!(handle.read_key(), None);
        console.shutdown();
    }

    #[test]
    fn quit_runs_callback_on_event_thread() {
        let (tx, rx) = mpsc::channel();
        let display = HeadlessDisplay::scripted([HostEvent::Quit, HostEvent::Quit]);
        let console = Console::start(
            Box::new(display),
            Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_owned));
            }),
        )
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("uemu-console"));
        // A second quit request is not delivered again.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        console.shutdown();
    }

    /// Interactive display that fails on the first frame.
    struct BrokenDisplay;

    impl Display for BrokenDisplay {
        fn present(&mut self, _frame: &[u32]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal went away"))
        }

        fn poll_event(&mut self, _timeout: Duration) -> io::Result<Option<HostEvent>> {
            Ok(None)
        }

        fn is_interactive(&self) -> bool {
            true
        }
    }

    #[test]
    fn failed_display_stops_console_and_requests_quit() {
        let (tx, rx) = mpsc::channel();
        let console = Console::start(
            Box::new(BrokenDisplay),
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let handle = console.handle();
        assert!(wait_until(|| !handle.is_running()));

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            console.pause();
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn shutdown_stops_handles() {
        let console = Console::start(Box::new(HeadlessDisplay::new()), Box::new(|| {})).unwrap();
        let handle = console.handle();
        assert!(handle.is_running());
        console.shutdown();
        assert!(!handle.is_running());
    }

    #[test]
    fn cursor_bounds_are_checked() {
        let console = Console::start(Box::new(HeadlessDisplay::new()), Box::new(|| {})).unwrap();
        let handle = console.handle();
        assert!(handle.set_cursor(79, 24));
        assert!(!handle.set_cursor(80, 0));
        assert!(!handle.set_cursor(0, 25));
        assert_eq!((handle.cursor().column, handle.cursor().row), (79, 24));
    }

    #[test]
    fn reset_output_restores_default_attribute() {
        let console = Console::start(Box::new(HeadlessDisplay::new()), Box::new(|| {})).unwrap();
        let handle = console.handle();
        handle.set_attribute(0x4e);
        handle.output(&[u16::from(b'x')]);
        handle.reset_output();
        assert_eq!(handle.cursor(), TextCursor::HOME);
        assert_eq!(handle.framebuffer().pixel(0, 0), screen::palette(0));
    }
}
