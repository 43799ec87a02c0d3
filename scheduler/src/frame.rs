//! The frame-callback abstraction.
//!
//! The scheduler is driven by display refreshes, but it must not care
//! where they come from: a vsync callback, a timer, or a dedicated
//! ticker thread all work.  The controller asks its tick source for
//! the next tick and the host later delivers it by calling
//! [`crate::ExecutionController::on_frame`] with a timestamp.  A
//! cancelled handle must never be delivered.

/// Identifies one requested tick, so a stale request can be
/// cancelled (mirroring how a display-sync callback registration
/// would be).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickHandle(pub u64);

/// Supplies frame callbacks to the controller.
pub trait TickSource {
    /// Asks for one tick at the next display refresh.
    fn request_tick(&mut self) -> TickHandle;

    /// Withdraws a previous request.  Cancelling an already-fired or
    /// unknown handle is a no-op.
    fn cancel_tick(&mut self, handle: TickHandle);
}
