//! Interrupt requests and their acknowledgement timeout.
//!
//! An interrupt is a request, not a guarantee. The in-progress message sits
//! in `interrupt_pending` until the server answers with `interrupted`, or
//! with `result`/`error` if the turn finished first. If neither arrives in
//! time the user is told the interrupt may not have taken effect, and the
//! message keeps streaming.

use std::time::Duration;

use tokio::time::Instant;

use crate::assembler::Transcript;
use crate::error::InterruptTimeout;
use crate::protocol::ClientEvent;

/// Default time to wait for the server to acknowledge an interrupt.
pub const DEFAULT_INTERRUPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct PendingInterrupt {
    message_id: String,
    deadline: Instant,
    reported: bool,
}

/// Tracks at most one outstanding interrupt.
#[derive(Debug)]
pub struct InterruptController {
    timeout: Duration,
    pending: Option<PendingInterrupt>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new(DEFAULT_INTERRUPT_TIMEOUT)
    }
}

impl InterruptController {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: None,
        }
    }

    /// Request an interrupt of the transcript's in-progress turn.
    ///
    /// Returns the frame to send, or `None` when there is nothing to
    /// interrupt or an interrupt is already outstanding.
    pub fn request(&mut self, transcript: &mut Transcript, now: Instant) -> Option<ClientEvent> {
        if self.pending.is_some() {
            return None;
        }
        let message_id = transcript.mark_interrupt_pending()?;
        tracing::debug!(%message_id, "interrupt requested");
        self.pending = Some(PendingInterrupt {
            message_id,
            deadline: now + self.timeout,
            reported: false,
        });
        Some(ClientEvent::Interrupt)
    }

    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the next timeout check is due, if one is.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .as_ref()
            .filter(|p| !p.reported)
            .map(|p| p.deadline)
    }

    /// Report the timeout once the deadline has passed. Reported at most
    /// once per interrupt.
    pub fn check_timeout(&mut self, now: Instant) -> Option<InterruptTimeout> {
        let pending = self.pending.as_mut()?;
        if pending.reported || now < pending.deadline {
            return None;
        }
        pending.reported = true;
        Some(InterruptTimeout {
            message_id: pending.message_id.clone(),
            timeout: self.timeout,
        })
    }

    /// The interrupt frame never reached the server. Report it now rather
    /// than at the deadline; the turn stays `interrupt_pending`.
    pub fn report_unsent(&mut self) -> Option<InterruptTimeout> {
        let pending = self.pending.as_mut()?;
        if pending.reported {
            return None;
        }
        pending.reported = true;
        Some(InterruptTimeout {
            message_id: pending.message_id.clone(),
            timeout: self.timeout,
        })
    }

    /// The turn ended, by acknowledgement or otherwise.
    pub fn on_turn_finished(&mut self) {
        self.pending = None;
    }
}
