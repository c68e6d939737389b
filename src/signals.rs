//! SIGINT handling
//!
//! The first Ctrl-C only raises a flag that the reconciler checks between
//! resources. The handler is installed with `SA_RESETHAND`, so a second one
//! gets the default action and ends the process.

use anyhow::{Context, Result};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }.context("Failed to install SIGINT handler")?;
    log::debug!("SIGINT handler installed");
    Ok(())
}

/// Flag set by the first SIGINT
pub fn cancel_flag() -> &'static AtomicBool {
    &INTERRUPTED
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
