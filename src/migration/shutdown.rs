//! Termination signal handling
//!
//! The first SIGINT/SIGTERM cancels the token; the engine finishes the chunk
//! in flight, saves state and queue, then the process exits with
//! `128 + signal`. Signals arriving while that drain runs are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    draining: Arc<AtomicBool>,
    signal: Arc<AtomicI32>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record a termination request; only the first one counts
    pub fn trigger(&self, signal: i32) {
        if self.draining.swap(true, Ordering::SeqCst) {
            warn!(signal, "Shutdown already in progress, ignoring signal");
            return;
        }

        self.signal.store(signal, Ordering::SeqCst);
        info!(signal, "Shutdown requested, finishing current chunk");
        self.token.cancel();
    }

    pub fn received_signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    /// Conventional exit status for a signal-terminated process
    pub fn exit_code(&self) -> Option<i32> {
        self.received_signal().map(|signal| 128 + signal)
    }

    /// Spawn the listener task feeding OS signals into [`Self::trigger`]
    pub fn listen(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};

                let (mut interrupt, mut terminate) =
                    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                        (Ok(i), Ok(t)) => (i, t),
                        (Err(e), _) | (_, Err(e)) => {
                            error!(error = %e, "Failed to install signal handlers");
                            return;
                        }
                    };

                loop {
                    tokio::select! {
                        _ = interrupt.recv() => shutdown.trigger(SIGINT),
                        _ = terminate.recv() => shutdown.trigger(SIGTERM),
                    }
                }
            }

            #[cfg(not(unix))]
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to install Ctrl+C handler");
                    return;
                }
                shutdown.trigger(SIGINT);
            }
        })
    }
}
