//! Runs a loaded image against the emulated firmware.
//!
//! The guest gets a thread of its own with a generous stack. The driver
//! thread starts the console, hands the image to that thread and then only
//! waits for the first [`Outcome`]: the entry point returning, the guest
//! calling `Exit` or `ResetSystem`, the user closing the console, or a
//! signal. Whatever comes first wins. The image thread is never joined; once
//! an outcome is reported it is parked or abandoned to process exit, so no
//! guest code runs after the driver has moved on.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::{Context, bail};
use uefi::EfiStatus;

use crate::console::display::Display;
use crate::console::{Console, ConsoleHandle};
use crate::firmware::variables::VariableStore;
use crate::firmware::{self, Firmware};
use crate::loader::LoadedImage;

/// Stack reserved for the image thread. Firmware applications expect more
/// than the default thread stack.
const IMAGE_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Process exit code for an interrupted run, as a shell reports SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// How a guest run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The guest finished with a status, by returning from its entry point,
    /// calling `Exit` or resetting the system.
    Exited(EfiStatus),
    /// The host stopped the guest.
    Interrupted,
}

impl Outcome {
    /// The process exit code this outcome maps to.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(status) => exit_code(status),
            Self::Interrupted => INTERRUPTED_EXIT_CODE,
        }
    }
}

/// Translates a guest status into a process exit code: the low bits of the
/// status, negated for errors.
#[must_use]
pub fn exit_code(status: EfiStatus) -> i32 {
    let low = i32::try_from(status.code() & 0x7fff_ffff).unwrap_or(i32::MAX);
    if status.is_error() { -low } else { low }
}

/// A guest image with the state it boots with.
pub struct Emulator {
    image: LoadedImage,
    variables: VariableStore,
    pause: bool,
    outcomes: (Sender<Outcome>, Receiver<Outcome>),
}

impl Emulator {
    /// Prepares `image` to run with `variables` preloaded.
    #[must_use]
    pub fn new(image: LoadedImage, variables: VariableStore) -> Self {
        Self {
            image,
            variables,
            pause: false,
            outcomes: mpsc::channel(),
        }
    }

    /// Waits for a keypress after the guest exits, before closing the
    /// console.
    #[must_use]
    pub fn pause_before_exit(mut self, pause: bool) -> Self {
        self.pause = pause;
        self
    }

    /// A sender another thread can use to stop the run.
    #[must_use]
    pub fn interrupter(&self) -> Sender<Outcome> {
        self.outcomes.0.clone()
    }

    /// Runs the guest on `display` until the first outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot run guests at all, or if the
    /// console or image thread cannot be started.
    pub fn run(self, display: Box<dyn Display>) -> anyhow::Result<Outcome> {
        let session = self.start(display)?;
        let outcome = session.wait();
        Ok(session.close(outcome))
    }

    fn start(self, display: Box<dyn Display>) -> anyhow::Result<Session> {
        if !cfg!(target_arch = "x86_64") {
            bail!("guests can only run on x86-64 hosts");
        }
        let (sender, outcomes) = self.outcomes;

        let quit = sender.clone();
        let console = Console::start(
            display,
            Box::new(move || {
                log::info!("quit requested from the console");
                let _ = quit.send(Outcome::Interrupted);
            }),
        )
        .context("failed to start the console")?;

        let handle = console.handle();
        let image = self.image;
        let variables = self.variables;
        thread::Builder::new()
            .name("uemu-image".into())
            .stack_size(IMAGE_STACK_SIZE)
            .spawn(move || run_image(&image, variables, handle, &sender))
            .context("failed to start the image thread")?;

        Ok(Session {
            console,
            outcomes,
            pause: self.pause,
        })
    }
}

/// A guest that has been started.
struct Session {
    console: Console,
    outcomes: Receiver<Outcome>,
    pause: bool,
}

impl Session {
    /// Blocks until the first outcome.
    fn wait(&self) -> Outcome {
        // The image thread holds a sender until it reports, so a closed
        // channel means it died without reporting.
        self.outcomes.recv().unwrap_or_else(|_| {
            log::error!("image thread ended without an outcome");
            Outcome::Exited(EfiStatus::ABORTED)
        })
    }

    #[cfg(test)]
    fn console(&self) -> ConsoleHandle {
        self.console.handle()
    }

    /// Optionally pauses, then stops the console.
    fn close(self, outcome: Outcome) -> Outcome {
        log::debug!("guest finished: {outcome:?}");
        if self.pause && outcome != Outcome::Interrupted {
            self.console.pause();
        }
        self.console.shutdown();
        outcome
    }
}

/// Body of the image thread. Never returns once the guest has been
/// entered.
fn run_image(image: &LoadedImage, variables: VariableStore, console: ConsoleHandle, exit: &Sender<Outcome>) {
    let firmware = match Firmware::new(image.info(), console, variables, exit.clone()) {
        Ok(firmware) => firmware,
        Err(status) => {
            log::error!("failed to build the firmware: {status}");
            let _ = exit.send(Outcome::Exited(status));
            return;
        }
    };
    let image_handle = firmware.image_handle().as_raw();
    let system_table = firmware::install(firmware);

    // SAFETY: `image` outlives the call, since this thread never returns
    // from `terminate`; the loader validated the entry point.
    let status = unsafe {
        let entry = image.entry_point();
        log::debug!("entering guest at {:#x}", entry as usize);
        entry(image_handle, system_table)
    };
    log::debug!("entry point returned {status}");
    firmware::terminate(Outcome::Exited(status))
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use std::time::Duration;

    use uemu_pe::builder::{DEFAULT_IMAGE_BASE, ImageBuilder};

    use super::*;
    use crate::console::display::{HeadlessDisplay, HostEvent};
    use crate::console::screen::{DEFAULT_ATTRIBUTE, read_row};
    use crate::firmware::ucs2;
    use crate::loader::{self, LoadOptions};

    const FORCE_RELOCATION: LoadOptions = LoadOptions {
        honor_preferred_base: false,
    };

    /// `mov rax, status; ret`
    fn returning(status: EfiStatus) -> Vec<u8> {
        let mut code = vec![0x48, 0xb8];
        code.extend_from_slice(&(status.0 as u64).to_le_bytes());
        code.push(0xc3);
        ImageBuilder::new().text(&code).build()
    }

    /// Prints `text` through `ConOut->OutputString`, reading the string's
    /// address from a relocated pointer in `.data`, and returns its status.
    fn printing(text: &str) -> Vec<u8> {
        let builder = ImageBuilder::new();
        let text_rva = builder.next_virtual_address();
        let data_rva = text_rva + 0x1000;

        let load_at = text_rva + 15;
        let disp = data_rva.wrapping_sub(load_at).to_le_bytes();
        let code = [
            0x48, 0x83, 0xec, 0x28, // sub rsp, 0x28
            0x48, 0x8b, 0x4a, 0x40, // mov rcx, [rdx + ConOut]
            0x48, 0x8b, 0x15, disp[0], disp[1], disp[2], disp[3], // mov rdx, [rip + slot]
            0xff, 0x51, 0x08, // call [rcx + OutputString]
            0x48, 0x83, 0xc4, 0x28, // add rsp, 0x28
            0xc3, // ret
        ];

        let string_at = DEFAULT_IMAGE_BASE + u64::from(data_rva) + 8;
        let mut data = string_at.to_le_bytes().to_vec();
        for unit in ucs2::encode(text) {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        builder.text(&code).data(&data, 0x1000).dir64(data_rva).build()
    }

    /// Waits on `ConIn->WaitForKey` through `BootServices->WaitForEvent`.
    fn waiting() -> Vec<u8> {
        let code = [
            0x48, 0x83, 0xec, 0x38, // sub rsp, 0x38
            0x4c, 0x8b, 0x4a, 0x60, // mov r9, [rdx + BootServices]
            0x48, 0x8b, 0x42, 0x30, // mov rax, [rdx + ConIn]
            0x48, 0x8d, 0x50, 0x10, // lea rdx, [rax + WaitForKey]
            0xb9, 0x01, 0x00, 0x00, 0x00, // mov ecx, 1
            0x4c, 0x8d, 0x44, 0x24, 0x20, // lea r8, [rsp + 0x20]
            0x41, 0xff, 0x51, 0x60, // call [r9 + WaitForEvent]
            0x48, 0x83, 0xc4, 0x38, // add rsp, 0x38
            0xc3, // ret
        ];
        ImageBuilder::new().text(&code).build()
    }

    fn emulator(file: &[u8], options: LoadOptions) -> Emulator {
        let image = loader::load(file, options).unwrap();
        Emulator::new(image, VariableStore::default())
    }

    #[test]
    fn exit_codes_follow_the_status() {
        assert_eq!(exit_code(EfiStatus::SUCCESS), 0);
        assert_eq!(exit_code(EfiStatus::WARN_BUFFER_TOO_SMALL), 4);
        assert_eq!(exit_code(EfiStatus::UNSUPPORTED), -3);
        assert_eq!(exit_code(EfiStatus::NOT_FOUND), -14);
        assert_eq!(Outcome::Interrupted.exit_code(), INTERRUPTED_EXIT_CODE);
        assert_eq!(Outcome::Exited(EfiStatus::UNSUPPORTED).exit_code() & 0xff, 253);
    }

    #[test]
    fn returned_status_is_the_outcome() {
        for status in [EfiStatus::SUCCESS, EfiStatus::UNSUPPORTED] {
            let outcome = emulator(&returning(status), LoadOptions::default())
                .run(Box::new(HeadlessDisplay::new()))
                .unwrap();
            assert_eq!(outcome, Outcome::Exited(status));
        }
    }

    #[test]
    fn relocated_string_reaches_the_screen() {
        let emu = emulator(&printing("relocated ok\r\n"), FORCE_RELOCATION);
        let session = emu.start(Box::new(HeadlessDisplay::new())).unwrap();
        let outcome = session.wait();
        assert_eq!(outcome, Outcome::Exited(EfiStatus::SUCCESS));
        let console = session.console();
        assert_eq!(read_row(console.framebuffer(), 0, DEFAULT_ATTRIBUTE), "relocated ok");
        assert_eq!(console.cursor().row, 1);
        session.close(outcome);
    }

    #[test]
    fn key_wakes_a_waiting_guest() {
        let key = uefi::protocol::simple_text_input::InputKey::char(u16::from(b'y'));
        let display = HeadlessDisplay::scripted([HostEvent::Key(key)]);
        let outcome = emulator(&waiting(), LoadOptions::default())
            .run(Box::new(display))
            .unwrap();
        assert_eq!(outcome, Outcome::Exited(EfiStatus::SUCCESS));
    }

    #[test]
    fn interrupt_stops_a_waiting_guest() {
        let emu = emulator(&waiting(), LoadOptions::default());
        let interrupt = emu.interrupter();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.send(Outcome::Interrupted).unwrap();
        });
        let outcome = emu.run(Box::new(HeadlessDisplay::new())).unwrap();
        stopper.join().unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
    }

    #[test]
    fn console_quit_interrupts() {
        let display = HeadlessDisplay::scripted([HostEvent::Quit]);
        let outcome = emulator(&waiting(), LoadOptions::default())
            .run(Box::new(display))
            .unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
    }
}
