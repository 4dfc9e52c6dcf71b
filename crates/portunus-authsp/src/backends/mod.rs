//! Bundled AuthSP backends.

pub mod http_delegate;
pub mod ldap;
pub mod password;
pub mod sms;

pub use http_delegate::{HttpDelegateBackend, HttpDelegateSettings};
pub use ldap::{LdapBackend, LdapSettings};
pub use password::{hash_password, PasswordBackend, PasswordEntry};
pub use sms::{SmsBackend, SmsSettings};
