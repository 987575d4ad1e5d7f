//! Presentation backends for the emulated console.
//!
//! A [`Display`] is owned by the console's event thread. It shows frames and
//! turns host input into [`HostEvent`]s; everything else about the console
//! lives in the shared state the guest thread also touches.

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::Duration;

use uefi::protocol::simple_text_input::InputKey;

/// Input delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// A keystroke for the guest.
    Key(InputKey),
    /// The user asked to close the emulator.
    Quit,
}

/// A surface that presents the framebuffer and collects host input.
pub trait Display: Send {
    /// Presents one frame of `WIDTH` x `HEIGHT` pixels.
    ///
    /// # Errors
    ///
    /// Returns an error if the host surface cannot be drawn to.
    fn present(&mut self, frame: &[u32]) -> io::Result<()>;

    /// Waits up to `timeout` for one host event.
    ///
    /// # Errors
    ///
    /// Returns an error if reading host input fails.
    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<HostEvent>>;

    /// Whether a user can interact with this display.
    fn is_interactive(&self) -> bool;

    /// Releases the host surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the host surface cannot be restored.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A display that shows nothing.
///
/// Replays a fixed list of events, one per poll, then stays idle.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    script: VecDeque<HostEvent>,
}

impl HeadlessDisplay {
    /// A display with no input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A display that delivers `events` in order.
    #[must_use]
    pub fn scripted(events: impl IntoIterator<Item = HostEvent>) -> Self {
        Self {
            script: events.into_iter().collect(),
        }
    }
}

impl Display for HeadlessDisplay {
    fn present(&mut self, _frame: &[u32]) -> io::Result<()> {
        Ok(())
    }

    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<HostEvent>> {
        if let Some(event) = self.script.pop_front() {
            return Ok(Some(event));
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
