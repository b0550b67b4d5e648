use std::{
    io,
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::backoff::Sleeper;

/// Cooperative stop flag shared between signal handling and the relay loop.
///
/// Waiting on it through `Sleeper` returns as soon as shutdown is requested, so the loop never has to
/// sit out a full poll interval or retry delay after a signal.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (stopped, wakeup) = &*self.inner;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wakeup.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout`. Returns `true` if shutdown was requested before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (stopped, wakeup) = &*self.inner;
        let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wakeup
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl Sleeper for ShutdownSignal {
    fn sleep(&self, duration: Duration) -> bool {
        !self.wait_timeout(duration)
    }
}

/// Trigger `shutdown` on SIGINT or SIGTERM.
///
/// Signals are awaited on a dedicated thread running a single-threaded tokio runtime, so the relay loop
/// itself stays plain blocking code.
pub fn install_signal_handlers(shutdown: ShutdownSignal) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match wait_for_signal().await {
                    Ok(name) => info!(signal = name, "received signal, shutting down"),
                    Err(err) => {
                        error!(error = %err, "failed to listen for signals");
                        return;
                    }
                }
                shutdown.trigger();
            })
        })
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
