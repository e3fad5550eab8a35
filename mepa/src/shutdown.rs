use tokio::sync::watch;

/// The sending side of a shutdown notification.
///
/// A single [`Signal`] can hand out as many [`Shutdown`] listeners as necessary, even after the
/// signal was fired, a late listener observes the shutdown right away.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<bool>,
}

/// Tells whether some structure was shutdown.
///
/// This structure holds a [`watch::Receiver`] that receives only a single meaningful value, after
/// the value is received the structure will shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    // Identify if the shutdown signal was received.
    shutdown: bool,

    // Channel to receive the shutdown notification.
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Creates a new signal that was not fired yet.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Signal { tx }
    }

    /// Creates a new listener for this signal.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.tx.subscribe())
    }

    /// Notify every listener, present and future, about the shutdown.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// Verify if the signal was already fired.
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::new()
    }
}

impl Shutdown {
    /// Create new [`Shutdown`] structure that will listen to the given channel.
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Shutdown {
            shutdown: false,
            rx,
        }
    }

    /// Verify if it was shutdown.
    ///
    /// This never blocks, so it can be checked on every iteration of a loop.
    pub fn is_shut(&self) -> bool {
        self.shutdown || *self.rx.borrow()
    }

    /// Wait until the shutdown signal is received.
    ///
    /// A dropped [`Signal`] is also considered a shutdown, nobody is able to fire it anymore.
    pub async fn wait_shutdown(&mut self) {
        if self.shutdown {
            return;
        }

        // Does not matter what is the result, only that the value flipped or the sender is gone.
        let _ = self.rx.wait_for(|fired| *fired).await;
        self.shutdown = true;
    }
}
