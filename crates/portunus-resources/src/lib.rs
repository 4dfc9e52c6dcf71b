//! Portunus Resource Selector
//!
//! Given a resource-group name, returns the currently active backend
//! endpoint from a configured pool.

pub mod error;
pub mod group;
pub mod probe;
pub mod selector;

pub use error::{ResourceError, ResourceResult};
pub use group::{Resource, ResourceGroup};
pub use probe::{AlwaysAvailable, ResourceProbe, TcpProbe};
pub use selector::{ResourceSelector, DEFAULT_REFRESH_INTERVAL};
