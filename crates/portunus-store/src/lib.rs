//! Portunus Stores
//!
//! Key-value contracts for the two pieces of state the broker keeps:
//!
//! - [`session`] - in-flight authentication attempts keyed by [`Rid`]
//! - [`ticket`] - Ticket-Granting Tickets keyed by [`TicketId`]
//!
//! Reads return owned, versioned snapshots. Writes are compare-and-swap on
//! the snapshot version, so two workers never silently overwrite each other.
//!
//! [`Rid`]: portunus_core::Rid
//! [`TicketId`]: portunus_core::TicketId

pub mod error;
pub mod session;
pub mod ticket;
pub mod versioned;

pub use error::{StoreError, StoreResult};
pub use session::{
    modify_session, Authenticated, AuthspSlot, DelegationRecord, HandshakeState,
    InMemorySessionStore, SessionOrigin, SessionState, SessionStore,
    DEFAULT_SESSION_TTL_SECONDS,
};
pub use ticket::{
    modify_ticket, Grant, InMemoryTicketStore, Requester, Ticket, TicketKind, TicketStore,
    DEFAULT_TICKET_TTL_SECONDS, ERROR_TICKET_TTL_SECONDS,
};
pub use versioned::{Expiring, Versioned};
