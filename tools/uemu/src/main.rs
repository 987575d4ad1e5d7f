//! uemu: runs UEFI applications as ordinary host processes.
//!
//! Loads a PE32+ application into the process, builds a System Table whose
//! services are implemented on the host, and calls the entry point on a
//! dedicated thread while the console is drawn in the terminal. The
//! process exits with the guest's status.

mod cli;
mod config;
mod console;
mod emulator;
mod firmware;
mod loader;
mod verbose;

use std::process;
use std::sync::mpsc::Sender;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{SigSet, Signal};

use crate::cli::Cli;
use crate::config::{Config, DisplayBackend};
use crate::console::display::{Display, HeadlessDisplay};
use crate::console::terminal::TerminalDisplay;
use crate::emulator::{Emulator, Outcome};
use crate::loader::LoadOptions;
use crate::verbose::Timer;

/// Exit code for anything that keeps the guest from starting.
const FAILURE_EXIT_CODE: i32 = 1;

fn main() {
    let cli = Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("uemu: {err:#}");
            FAILURE_EXIT_CODE
        }
    };
    process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    // Blocked before any thread exists, so every thread inherits the mask
    // and only the watcher ever sees them.
    let signals = termination_signals();
    signals.thread_block().context("failed to block termination signals")?;

    let config = Config::load(cli.config.as_deref())?;
    let variables = config.variable_store()?;
    let options = LoadOptions {
        honor_preferred_base: config.image.honor_preferred_base && !cli.no_preferred_base,
    };

    let image = {
        let _t = Timer::start("image load");
        match loader::load_file(&cli.image, options) {
            Ok(image) => image,
            Err(err) => {
                eprintln!("uemu: failed to load {}: {err}", cli.image.display());
                return Ok(FAILURE_EXIT_CODE);
            }
        }
    };
    log::debug!(
        "{} mapped at {:#x} (preferred {:#x}), {} sections, {} fixups",
        cli.image.display(),
        image.base(),
        image.header().image_base,
        image.sections().len(),
        image.relocations().fixups,
    );
    if image.was_relocated() && options.honor_preferred_base {
        log::info!("preferred base {:#x} was not available", image.header().image_base);
    }

    let display: Box<dyn Display> = match cli.display.unwrap_or(config.display.backend) {
        DisplayBackend::Terminal => Box::new(TerminalDisplay::open().context("failed to open the terminal")?),
        DisplayBackend::Headless => Box::new(HeadlessDisplay::new()),
    };

    let emulator = Emulator::new(image, variables).pause_before_exit(cli.pause);
    watch_signals(signals, emulator.interrupter())?;
    let outcome = emulator.run(display)?;
    Ok(outcome.exit_code())
}

fn termination_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set
}

/// Reports the first termination signal as an interrupt.
fn watch_signals(signals: SigSet, interrupt: Sender<Outcome>) -> Result<()> {
    thread::Builder::new()
        .name("uemu-signals".into())
        .spawn(move || match signals.wait() {
            Ok(signal) => {
                log::info!("received {}", signal.as_str());
                let _ = interrupt.send(Outcome::Interrupted);
            }
            Err(err) => log::error!("waiting for signals failed: {err}"),
        })
        .context("failed to start the signal watcher")?;
    Ok(())
}
