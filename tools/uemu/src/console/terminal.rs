//! Terminal display: the framebuffer drawn with half-block characters.
//!
//! Each terminal cell shows two vertically stacked pixels, the upper one as
//! the foreground of `▀` and the lower one as its background. The
//! framebuffer is sampled down to whatever size the terminal has.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;
use ratatui::widgets::Widget;
use uefi::protocol::simple_text_input::{InputKey, chars, scan_code};

use super::display::{Display, HostEvent};
use super::screen::{HEIGHT, WIDTH, components};

const UPPER_HALF_BLOCK: char = '\u{2580}';

/// A [`Display`] on the controlling terminal, in raw mode on the alternate
/// screen.
pub struct TerminalDisplay {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    open: bool,
}

impl TerminalDisplay {
    /// Switches the terminal to raw mode and the alternate screen.
    ///
    /// # Errors
    ///
    /// Returns an error if stdout is not a terminal that supports this.
    pub fn open() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = stdout.execute(EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err);
        }
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.hide_cursor()?;
        terminal.clear()?;
        Ok(Self { terminal, open: true })
    }
}

impl Display for TerminalDisplay {
    fn present(&mut self, frame: &[u32]) -> io::Result<()> {
        self.terminal.draw(|f| f.render_widget(HalfBlocks { frame }, f.area()))?;
        Ok(())
    }

    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<HostEvent>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        Ok(match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => translate(key),
            _ => None,
        })
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.terminal.show_cursor()?;
        self.terminal.backend_mut().execute(LeaveAlternateScreen)?;
        disable_raw_mode()
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to restore terminal: {err}");
        }
    }
}

/// Samples the framebuffer into half-block cells.
struct HalfBlocks<'a> {
    frame: &'a [u32],
}

impl HalfBlocks<'_> {
    fn color(&self, x: usize, y: usize) -> Color {
        let (r, g, b) = components(self.frame.get(y * WIDTH + x).copied().unwrap_or(0));
        Color::Rgb(r, g, b)
    }
}

impl Widget for HalfBlocks<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }
        let columns = usize::from(area.width);
        let pixel_rows = usize::from(area.height) * 2;
        for ty in 0..area.height {
            for tx in 0..area.width {
                let x = usize::from(tx) * WIDTH / columns;
                let upper = usize::from(ty) * 2 * HEIGHT / pixel_rows;
                let lower = (usize::from(ty) * 2 + 1) * HEIGHT / pixel_rows;
                if let Some(cell) = buf.cell_mut((area.x + tx, area.y + ty)) {
                    cell.set_char(UPPER_HALF_BLOCK)
                        .set_fg(self.color(x, upper))
                        .set_bg(self.color(x, lower));
                }
            }
        }
    }
}

/// Maps a terminal key press to a console event.
///
/// `Ctrl-C` requests quit, since raw mode keeps it from raising SIGINT.
/// Keys with no UEFI equivalent are ignored.
#[must_use]
pub fn translate(key: KeyEvent) -> Option<HostEvent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(HostEvent::Quit);
    }
    let input = match key.code {
        KeyCode::Backspace => InputKey::char(chars::BACKSPACE),
        KeyCode::Tab => InputKey::char(chars::TAB),
        KeyCode::Enter => InputKey::char(chars::CARRIAGE_RETURN),
        KeyCode::Up => InputKey::scan(scan_code::UP),
        KeyCode::Down => InputKey::scan(scan_code::DOWN),
        KeyCode::Right => InputKey::scan(scan_code::RIGHT),
        KeyCode::Left => InputKey::scan(scan_code::LEFT),
        KeyCode::Home => InputKey::scan(scan_code::HOME),
        KeyCode::End => InputKey::scan(scan_code::END),
        KeyCode::Insert => InputKey::scan(scan_code::INSERT),
        KeyCode::Delete => InputKey::scan(scan_code::DELETE),
        KeyCode::PageUp => InputKey::scan(scan_code::PAGE_UP),
        KeyCode::PageDown => InputKey::scan(scan_code::PAGE_DOWN),
        KeyCode::F(n @ 1..=10) => InputKey::scan(scan_code::F1 + u16::from(n) - 1),
        KeyCode::F(11) => InputKey::scan(scan_code::F11),
        KeyCode::F(12) => InputKey::scan(scan_code::F12),
        KeyCode::Esc => InputKey::scan(scan_code::ESC),
        KeyCode::Char(c) if c.is_ascii() && !c.is_ascii_control() => InputKey::char(c as u16),
        _ => return None,
    };
    Some(HostEvent::Key(input))
}
