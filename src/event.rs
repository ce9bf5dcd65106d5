//! Event queue
//!
//! Everything that happens to a transmitter — host API calls, timer expiry,
//! cipher and port interrupts — is funnelled into a pending-event bitset
//! and handled when the instance is next polled. Posting is lock-free and
//! safe from interrupt context; draining snapshots the set and clears it in
//! one atomic exchange, so an event posted mid-drain is seen on the next
//! poll.

use core::sync::atomic::{AtomicU16, Ordering};

/// Events consumed by the transmitter state machine
///
/// Drain order is ascending discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    /// Start (or restart) the authentication handshake
    Authenticate = 0,
    /// Run a link-integrity check against the downstream device
    Check = 1,
    /// Shut the interface down
    Disable = 2,
    /// Bring the interface up
    Enable = 3,
    /// The physical link dropped mid-stream
    LinkDown = 4,
    /// The physical layer went down
    PhyDown = 5,
    /// The physical layer came up
    PhyUp = 6,
    /// Periodic service tick
    Poll = 7,
    /// The one-shot platform timer fired
    Timeout = 8,
}

impl Event {
    const COUNT: u8 = 9;

    fn bit(self) -> u16 {
        1 << (self as u8)
    }

    fn from_ordinal(ordinal: u8) -> Option<Event> {
        match ordinal {
            0 => Some(Event::Authenticate),
            1 => Some(Event::Check),
            2 => Some(Event::Disable),
            3 => Some(Event::Enable),
            4 => Some(Event::LinkDown),
            5 => Some(Event::PhyDown),
            6 => Some(Event::PhyUp),
            7 => Some(Event::Poll),
            8 => Some(Event::Timeout),
            _ => None,
        }
    }
}

/// Pending-event bitset
///
/// Duplicate posts coalesce. `Disable` cancels a pending `Enable` and
/// `PhyDown` cancels a pending `PhyUp`; every other pair is independent.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    pending: AtomicU16,
}

impl EventQueue {
    pub(crate) const fn new() -> Self {
        Self {
            pending: AtomicU16::new(0),
        }
    }

    /// Post an event. Safe from interrupt context.
    pub(crate) fn post(&self, event: Event) {
        match event {
            Event::Disable => {
                self.pending.fetch_and(!Event::Enable.bit(), Ordering::AcqRel);
            }
            Event::PhyDown => {
                self.pending.fetch_and(!Event::PhyUp.bit(), Ordering::AcqRel);
            }
            _ => {}
        }
        self.pending.fetch_or(event.bit(), Ordering::AcqRel);
    }

    /// Snapshot and clear the pending set
    pub(crate) fn drain(&self) -> PendingEvents {
        PendingEvents {
            bits: self.pending.swap(0, Ordering::AcqRel),
            ordinal: 0,
        }
    }
}

/// Iterator over a drained pending set, ascending ordinal
pub(crate) struct PendingEvents {
    bits: u16,
    ordinal: u8,
}

impl Iterator for PendingEvents {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        while self.ordinal < Event::COUNT {
            let event = Event::from_ordinal(self.ordinal)?;
            self.ordinal += 1;
            if self.bits & event.bit() != 0 {
                return Some(event);
            }
        }
        None
    }
}
