//! Request, response and HTML form types

pub mod forms;
pub mod requests;
pub mod responses;

pub use requests::{
    ApiForm, AuthspChoiceForm, CredentialsForm, CrossLoginQuery, CrossReturnQuery, LoginQuery,
    OrganizationChoiceForm,
};
pub use responses::{ApiReply, BrowserResponse, HealthResponse};
