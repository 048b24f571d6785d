//! Operator Interrupt Menu
//!
//! Pressing CTRL-C never kills the server outright: the SIGINT handler only
//! raises an atomic flag, and the receive loop opens the operator menu at
//! the next safe point (between frames, never mid-handler). While the menu
//! is open the socket is not serviced but stays open.
//!
//! Menu actions: print the configuration, reload the configuration file,
//! reset the protocol state, stop the server, or cancel. A blank input
//! cancels.

use nix::sys::signal::{self, SigHandler, Signal};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Register the SIGINT handler; call once at startup
pub fn install() -> Result<(), nix::errno::Errno> {
    unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(on_sigint)) }.map(|_| ())
}

/// Consume a pending interrupt, if any
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// What the operator picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    PrintConfig,
    ReloadConfig,
    ResetState,
    Stop,
    Cancel,
}

/// Show the menu and read one choice from the operator
pub fn prompt(config_path: &std::path::Path) -> AdminAction {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "\nYou have pressed CTRL-C. Would you like to:\n");
    let _ = writeln!(stdout, "[P] Print the configuration");
    let _ = writeln!(
        stdout,
        "[R] Reload the configuration file ({})",
        config_path.display()
    );
    let _ = writeln!(stdout, "[T] Reset state of the server");
    let _ = writeln!(stdout, "[S] Stop the server");
    let _ = writeln!(stdout, "[C] Cancel your action\n");
    let _ = write!(stdout, "Your input [P/R/T/S/C]: ");
    let _ = stdout.flush();

    let mut line = String::new();
    if stdin.lock().read_line(&mut line).is_err() {
        warn!("could not read operator input; cancelling");
        return AdminAction::Cancel;
    }
    parse_action(&line)
}

fn parse_action(line: &str) -> AdminAction {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" => AdminAction::PrintConfig,
        "r" => AdminAction::ReloadConfig,
        "t" => AdminAction::ResetState,
        "s" => AdminAction::Stop,
        _ => AdminAction::Cancel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_is_consumed_once() {
        INTERRUPTED.store(true, Ordering::SeqCst);
        assert!(take_interrupt());
        assert!(!take_interrupt());
    }

    #[test]
    fn blank_or_garbage_input_cancels() {
        assert_eq!(parse_action(""), AdminAction::Cancel);
        assert_eq!(parse_action("\n"), AdminAction::Cancel);
        assert_eq!(parse_action("x\n"), AdminAction::Cancel);
    }

    #[test]
    fn actions_are_case_insensitive() {
        assert_eq!(parse_action("P\n"), AdminAction::PrintConfig);
        assert_eq!(parse_action("r\n"), AdminAction::ReloadConfig);
        assert_eq!(parse_action("T\n"), AdminAction::ResetState);
        assert_eq!(parse_action("s"), AdminAction::Stop);
    }
}
