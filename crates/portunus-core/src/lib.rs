//! Portunus Core Library
//!
//! Shared types for the Portunus single-sign-on broker.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (Rid, TicketId, AuthorityId, ...)
//! - [`result_code`] - Stable wire result codes
//! - [`attributes`] - Authentication levels and the attribute bag
//! - [`error`] - Error types (CoreError)
//!
//! # Example
//!
//! ```
//! use portunus_core::{AttributeBag, AuthLevel, ResultCode, Rid};
//!
//! let rid = Rid::generate();
//! let attrs = AttributeBag::new().with("mail", "jane@example.org");
//! assert!(AuthLevel(20).satisfies(AuthLevel(10)));
//! assert_eq!(ResultCode::Success.as_str(), "0000");
//! # let _ = (rid, attrs);
//! ```

pub mod attributes;
pub mod error;
pub mod ids;
pub mod result_code;

pub use attributes::{AttributeBag, AuthLevel};
pub use error::{CoreError, Result};
pub use ids::{AppId, AuthorityId, AuthspId, OrganizationId, ParseIdError, Rid, TicketId};
pub use result_code::{ResultCode, UnknownResultCode};
