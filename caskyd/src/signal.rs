//! `SIGINT`/`SIGTERM` handling: `ctrlc::set_handler` flips a
//! `tokio::sync::watch` channel instead of a plain `AtomicBool`, so the
//! async accept loop in [`crate::server`] can `select!` on it directly.

use anyhow::Result;
use log::info;
use tokio::sync::watch;

/// Installs a handler that sets the shutdown flag to `true` on
/// `SIGINT`/`SIGTERM`. Returns the receiving end for [`crate::server::serve`].
pub fn install() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);

    ctrlc::set_handler(move || {
        info!("received shutdown signal, no longer accepting new connections");
        // An error here only means the receiver was already dropped, which
        // happens if the server has already shut down.
        let _ = tx.send(true);
    })?;

    Ok(rx)
}
