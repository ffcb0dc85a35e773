use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use colored::Colorize;

/// Shared Ctrl+C state.
///
/// The first request stops the batch after the current file,
/// the second one also kills the running encoder.
#[derive(Debug, Default)]
pub struct AbortSignal {
    stop: AtomicBool,
    kill: AtomicBool,
}

/// What a single abort request escalated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortLevel {
    FinishCurrent,
    KillCurrent,
}

impl AbortSignal {
    /// Register a Ctrl+C handler that escalates this signal.
    pub fn install_handler(self: &Arc<Self>) -> Result<()> {
        let signal = Arc::clone(self);
        ctrlc::set_handler(move || match signal.request() {
            AbortLevel::FinishCurrent => {
                println!(
                    "\n{}",
                    "Received Ctrl+C, finishing current file... (press again to abort it)"
                        .yellow()
                        .bold()
                );
            }
            AbortLevel::KillCurrent => {
                println!("\n{}", "Received Ctrl+C again, aborting current file...".red().bold());
            }
        })
        .context("Failed to set Ctrl+C handler")
    }

    pub fn request(&self) -> AbortLevel {
        if self.stop.swap(true, Ordering::SeqCst) {
            self.kill.store(true, Ordering::SeqCst);
            AbortLevel::KillCurrent
        } else {
            AbortLevel::FinishCurrent
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn should_kill(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }
}
