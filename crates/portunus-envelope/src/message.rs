//! Canonical signed-data construction.
//!
//! Every protocol message signs the plain concatenation of a fixed field
//! list. Optional fields are skipped when absent and URL-decoded once when
//! present, so a value signed before encoding still matches after the
//! browser or HTTP client has encoded it.

use std::borrow::Cow;

/// Ordered field values of one signed message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedFields {
    data: String,
}

impl SignedFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mandatory field as-is.
    #[must_use]
    pub fn push(mut self, value: &str) -> Self {
        self.data.push_str(value);
        self
    }

    /// Appends an optional field, URL-decoded once. Absent or empty values
    /// are skipped.
    #[must_use]
    pub fn push_optional(mut self, value: Option<&str>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.data.push_str(&decode_once(value));
        }
        self
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.data
    }

    /// `a-select-server, app_id, app_url, forced_logon, uid?, country?,
    /// language?, remote_organization?`
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn authenticate_request(
        server: &str,
        app_id: &str,
        app_url: &str,
        forced_logon: bool,
        uid: Option<&str>,
        country: Option<&str>,
        language: Option<&str>,
        remote_organization: Option<&str>,
    ) -> Self {
        Self::new()
            .push(server)
            .push(app_id)
            .push(app_url)
            .push(if forced_logon { "true" } else { "false" })
            .push_optional(uid)
            .push_optional(country)
            .push_optional(language)
            .push_optional(remote_organization)
    }

    /// `a-select-server, app_id, retry_counter`
    #[must_use]
    pub fn retry_counter(server: &str, app_id: &str, retry_counter: &str) -> Self {
        Self::new().push(server).push(app_id).push(retry_counter)
    }

    /// `a-select-server, rid, aselect_credentials`
    ///
    /// Shared by the application redirect and the `verify_credentials`
    /// request.
    #[must_use]
    pub fn credentials(server: &str, rid: &str, credentials: &str) -> Self {
        Self::new().push(server).push(rid).push(credentials)
    }

    /// `rid, result_code, uid?, organization?, authsp?, authsp_level?,
    /// app_level?, tgt_exp_time?, attributes?`
    #[must_use]
    pub fn verify_credentials_response(response: &VerifyResponseFields<'_>) -> Self {
        Self::new()
            .push(response.rid)
            .push(response.result_code)
            .push_optional(response.uid)
            .push_optional(response.organization)
            .push_optional(response.authsp)
            .push_optional(response.authsp_level)
            .push_optional(response.app_level)
            .push_optional(response.tgt_exp_time)
            .push_optional(response.attributes)
    }

    /// `a-select-server, local_rid, as_url, required_level, uid?`
    #[must_use]
    pub fn cross_login(
        server: &str,
        local_rid: &str,
        as_url: &str,
        required_level: &str,
        uid: Option<&str>,
    ) -> Self {
        Self::new()
            .push(server)
            .push(local_rid)
            .push(as_url)
            .push(required_level)
            .push_optional(uid)
    }

    /// `a-select-server, rid, local_rid, aselect_credentials`
    #[must_use]
    pub fn cross_return(server: &str, rid: &str, local_rid: &str, credentials: &str) -> Self {
        Self::new()
            .push(server)
            .push(rid)
            .push(local_rid)
            .push(credentials)
    }

    /// `a-select-server, aselect_credentials`
    #[must_use]
    pub fn kill_tgt(server: &str, credentials: &str) -> Self {
        Self::new().push(server).push(credentials)
    }

    /// `a-select-server, rid`
    #[must_use]
    pub fn kill_session(server: &str, rid: &str) -> Self {
        Self::new().push(server).push(rid)
    }

    /// `a-select-server, app_id`
    #[must_use]
    pub fn get_app_level(server: &str, app_id: &str) -> Self {
        Self::new().push(server).push(app_id)
    }
}

/// Borrowed view of a `verify_credentials` response for signing.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyResponseFields<'a> {
    pub rid: &'a str,
    pub result_code: &'a str,
    pub uid: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub authsp: Option<&'a str>,
    pub authsp_level: Option<&'a str>,
    pub app_level: Option<&'a str>,
    pub tgt_exp_time: Option<&'a str>,
    pub attributes: Option<&'a str>,
}

fn decode_once(value: &str) -> Cow<'_, str> {
    // A value that is not valid percent-encoding is signed verbatim.
    urlencoding::decode(value).unwrap_or(Cow::Borrowed(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mandatory_fields_are_concatenated_in_order() {
        let fields = SignedFields::retry_counter("broker-a", "app1", "1:tok");
        assert_eq!(fields.into_string(), "broker-aapp11:tok");
    }

    #[test]
    fn test_optional_fields_are_skipped_when_absent() {
        let with = SignedFields::cross_login("a", "rid", "https://x/ret", "10", Some("jane"));
        let without = SignedFields::cross_login("a", "rid", "https://x/ret", "10", None);
        let empty = SignedFields::cross_login("a", "rid", "https://x/ret", "10", Some(""));
        assert_eq!(with.into_string(), "aridhttps://x/ret10jane");
        assert_eq!(without.clone().into_string(), "aridhttps://x/ret10");
        assert_eq!(without, empty);
    }

    #[test]
    fn test_optional_fields_are_decoded_exactly_once() {
        let fields = SignedFields::new()
            .push_optional(Some("jane%40example.org"))
            .push_optional(Some("a%2541"));
        assert_eq!(fields.into_string(), "jane@example.orga%41");
    }

    #[test]
    fn test_mandatory_fields_are_not_decoded() {
        let fields = SignedFields::credentials("a", "r%40", "c");
        assert_eq!(fields.into_string(), "ar%40c");
    }

    #[test]
    fn test_authenticate_request_order() {
        let fields = SignedFields::authenticate_request(
            "broker-a",
            "app1",
            "https://app/return",
            true,
            None,
            Some("NL"),
            Some("nl"),
            None,
        );
        assert_eq!(
            fields.into_string(),
            "broker-aapp1https://app/returntrueNLnl"
        );
    }

    #[test]
    fn test_verify_response_order() {
        let fields = SignedFields::verify_credentials_response(&VerifyResponseFields {
            rid: "r1",
            result_code: "0000",
            uid: Some("jane"),
            organization: Some("org"),
            authsp_level: Some("20"),
            ..Default::default()
        });
        assert_eq!(fields.into_string(), "r10000janeorg20");
    }
}
