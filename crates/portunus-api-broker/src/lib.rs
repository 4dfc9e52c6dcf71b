//! Portunus broker API
//!
//! HTTP surface of the single-sign-on broker:
//! - Browser entry (`/login`, AuthSP and organization selection, credential
//!   forms)
//! - Cross-domain delegation to and from peer brokers (`/cross/login`,
//!   `/cross/return`)
//! - The form-encoded back-channel (`/api`) used by applications and peers
//! - Ticket issuance, single-sign-on renewal and logout

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

pub use error::{BrokerError, BrokerResult};
pub use models::{ApiForm, ApiReply, BrowserResponse};
pub use router::broker_router;
pub use services::applications::{ApplicationDescriptor, ApplicationRegistry};
pub use services::organizations::{OrganizationDescriptor, OrganizationRegistry};
pub use services::ticket_issuer::{IssuedTicket, TicketIssuer, CREDENTIALS_COOKIE};
pub use state::{BrokerConfig, BrokerState};
