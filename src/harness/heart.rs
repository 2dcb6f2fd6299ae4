//! Keeps a long-running module alive until it is asked to stop

use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{pin_mut, select, FutureExt, SinkExt, StreamExt};
use tracing::{debug, error, warn};
use std::fmt;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// SIGTERM, SIGINT or another process-external cause
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathReason::Killed(reason) => write!(f, "Killed ({})", reason),
            DeathReason::Terminated => write!(f, "Terminated due to external signal"),
        }
    }
}

/// Lifecycle handle which resolves once the process should shut down
///
/// Returned by [`Module::run`](super::Module::run) when the module keeps working in
/// background tasks, like a responder consuming its queue.
pub struct Heart {
    rx: Receiver<String>,
    listen_for_signals: bool,
}

impl Heart {
    /// Creates a new heart which dies on termination signals or through its stone
    pub fn new() -> (Self, HeartStone) {
        let (tx, rx) = channel(2);

        let heart = Self {
            rx,
            listen_for_signals: true,
        };

        (heart, HeartStone { remote: tx })
    }

    /// Creates a heart which only dies through its stone
    pub fn detached() -> (Self, HeartStone) {
        let (mut heart, stone) = Self::new();
        heart.listen_for_signals = false;
        (heart, stone)
    }

    /// Waits until the heart dies and returns why
    pub async fn death(&mut self) -> DeathReason {
        let signals = if self.listen_for_signals {
            termination_signal().boxed()
        } else {
            futures::future::pending().boxed()
        }
        .fuse();
        pin_mut!(signals);

        debug!("Heart starts beating");

        select! {
            reason = self.rx.next() => match reason {
                Some(reason) => DeathReason::Killed(reason),
                None => DeathReason::Killed("all heart stones have been dropped".into()),
            },
            () = signals => DeathReason::Terminated,
        }
    }
}

async fn termination_signal() {
    let sigterm = match signal(SignalKind::terminate()) {
        Ok(mut stream) => async move {
            stream.recv().await;
        }
        .boxed(),
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            futures::future::pending().boxed()
        }
    }
    .fuse();

    let interrupt = async {
        if let Err(e) = ctrl_c().await {
            warn!("Unable to listen for SIGINT: {}", e);
            futures::future::pending::<()>().await;
        }
    }
    .fuse();

    pin_mut!(sigterm, interrupt);

    select! {
        () = sigterm => {},
        () = interrupt => {},
    }
}

/// Remote control which kills the associated [`Heart`]
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    /// Kill the associated heart
    pub async fn kill(&mut self, reason: impl Into<String>) {
        if let Err(e) = self.remote.send(reason.into()).await {
            error!("Failed to interact with Heart: {}", e);
        }
    }
}
