//! HTTP handlers for the broker endpoints

pub mod api;
pub mod browser;
pub mod health;

pub use api::api;
pub use browser::{
    choose_authsp, choose_organization, cross_login, cross_return, login, logout,
    submit_credentials,
};
pub use health::health;
