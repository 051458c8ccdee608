/// Host moments that must not lose unsynced data.
///
/// Hosts map their own events onto these (page hide / visibility change /
/// unload in a browser shell, ctrl-c in the terminal host) and hand them to
/// `SyncHandle::on_lifecycle_signal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The surface went to the background; flush opportunistically.
    Hidden,
    /// The process or tab is closing; the flush is awaited.
    Closing,
    /// The user asked to sign out; the final flush must complete before
    /// the session is torn down.
    SigningOut,
}
