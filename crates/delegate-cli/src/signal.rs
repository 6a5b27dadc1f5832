//! Ctrl-C handling shared by long-running commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Exit status used when the process is interrupted.
pub const INTERRUPTED_EXIT: i32 = 130;

/// First signal cancels `cancel`, second force-exits.
pub fn install_ctrl_c(cancel: CancellationToken) {
    let got_first_signal = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(INTERRUPTED_EXIT);
            }
            eprintln!("\nCancelling running tasks (Ctrl+C again to force)...");
            cancel.cancel();
        }
    });
}
