//! Scheduler capability the control core is written against.
//!
//! The host event loop implements [`EventSource`]; the core only ever asks
//! it to start or stop delivering readiness events and to begin shutdown.

use crate::registry::ConnectionId;

/// Readiness notifications requested from the host event loop.
///
/// Calls are requests: the host applies them before delivering the next
/// event, never re-entrantly.
pub trait EventSource {
    /// Deliver accept callbacks while connections are pending on the
    /// listening socket.
    fn watch_accept(&self);

    /// Stop delivering accept callbacks.
    fn unwatch_accept(&self);

    /// Deliver read events for `id`.
    fn watch_readable(&self, id: ConnectionId);

    /// Deliver one write-readiness event for `id`.
    fn watch_writable(&self, id: ConnectionId);

    /// Forget every registration for `id`.
    fn unwatch(&self, id: ConnectionId);

    /// Ask the process main loop to begin orderly shutdown.
    fn request_shutdown(&self);
}
