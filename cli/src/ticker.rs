//! Frame generation for a terminal host.
//!
//! A display would deliver frame callbacks by itself; a terminal has
//! no vsync, so we synthesise one.  [`FrameClock`] sleeps out a fixed
//! refresh interval against an absolute schedule (a late frame
//! shortens the next sleep instead of shifting every subsequent
//! frame), and [`HostTicks`]/[`TickRequests`] carry the controller's
//! tick requests across to the host loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{event, Level};

use scheduler::{TickHandle, TickSource};

/// If the host falls further behind schedule than this many frames,
/// the schedule is resynchronised instead of replayed.
const RESYNC_THRESHOLD_FRAMES: u32 = 4;

/// A fixed-rate frame schedule.
pub struct FrameClock {
    interval: Duration,
    origin: Instant,
    next_due: Instant,
}

impl FrameClock {
    #[must_use]
    pub fn new(refresh_rate_hz: f64) -> FrameClock {
        let hz = if refresh_rate_hz.is_finite() && refresh_rate_hz > 0.0 {
            refresh_rate_hz
        } else {
            60.0
        };
        let origin = Instant::now();
        let interval = Duration::from_secs_f64(1.0 / hz);
        FrameClock {
            interval,
            origin,
            next_due: origin + interval,
        }
    }

    /// Sleeps until the next scheduled frame and returns its
    /// timestamp in milliseconds since the clock was created.
    pub fn wait_for_next_frame(&mut self) -> f64 {
        let now = Instant::now();
        if let Some(remaining) = self.next_due.checked_duration_since(now) {
            sleep(remaining);
        } else {
            let behind = now - self.next_due;
            if behind > self.interval * RESYNC_THRESHOLD_FRAMES {
                event!(
                    Level::DEBUG,
                    "frame schedule {behind:?} behind, resynchronising"
                );
                self.next_due = now;
            }
        }
        self.next_due += self.interval;
        (Instant::now() - self.origin).as_secs_f64() * 1000.0
    }
}

/// The controller-facing half of the tick plumbing.  At most one
/// tick request is outstanding at a time; requesting a new one
/// replaces any previous request.
pub struct HostTicks {
    armed: Arc<AtomicU64>,
    next_handle: u64,
}

/// The host-loop-facing half: polls for an armed request once per
/// synthesised frame.
pub struct TickRequests {
    armed: Arc<AtomicU64>,
}

impl HostTicks {
    /// Creates a connected pair.
    #[must_use]
    pub fn new() -> (HostTicks, TickRequests) {
        let armed = Arc::new(AtomicU64::new(0));
        (
            HostTicks {
                armed: Arc::clone(&armed),
                next_handle: 0,
            },
            TickRequests { armed },
        )
    }
}

impl TickSource for HostTicks {
    fn request_tick(&mut self) -> TickHandle {
        self.next_handle += 1;
        self.armed.store(self.next_handle, Ordering::Release);
        TickHandle(self.next_handle)
    }

    fn cancel_tick(&mut self, handle: TickHandle) {
        // Only withdraw the request if it is still the outstanding
        // one; a newer request must survive a stale cancellation.
        let _ = self.armed.compare_exchange(
            handle.0,
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

impl TickRequests {
    /// Consumes the outstanding tick request, if any.  The caller
    /// delivers the frame by invoking the controller.
    #[must_use]
    pub fn take(&self) -> bool {
        self.armed.swap(0, Ordering::AcqRel) != 0
    }
}
