//! Minimal HTML pages rendered by the broker.
//!
//! Every interpolated value goes through [`html_escape`].

use portunus_authsp::{AuthspDescriptor, CredentialPrompt, PASSWORD_FIELD, RESPONSE_FIELD};
use portunus_core::{ResultCode, Rid};

use crate::services::organizations::OrganizationDescriptor;

/// HTML escape for XSS prevention
#[must_use]
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        r#"<input type="hidden" name="{}" value="{}"/>"#,
        html_escape(name),
        html_escape(value)
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8"/>
    <title>{}</title>
</head>
<body>
{}
</body>
</html>"#,
        html_escape(title),
        body
    )
}

/// Self-submitting POST form, used to re-enter the broker between chained
/// AuthSPs.
#[must_use]
pub fn generate_auto_submit_form(action: &str, fields: &[(&str, &str)]) -> String {
    let inputs: String = fields
        .iter()
        .map(|(name, value)| hidden(name, value))
        .collect::<Vec<_>>()
        .join("\n        ");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Continue login</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="POST" action="{}">
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(action),
        inputs
    )
}

fn text_input(name: &str) -> String {
    let kind = if name == PASSWORD_FIELD {
        "password"
    } else {
        "text"
    };
    format!(
        r#"<label>{0} <input type="{1}" name="{0}" autocomplete="off"/></label>"#,
        html_escape(name),
        kind
    )
}

/// Credential form for one AuthSP round.
///
/// In a challenge round only the `response` field is asked for. Otherwise
/// the form asks for the uid (unless it is locked) and every required key,
/// which for a `direct` password AuthSP is the combined username/password
/// form.
#[must_use]
pub fn credential_form(
    action: &str,
    rid: &Rid,
    descriptor: &AuthspDescriptor,
    prompt: &CredentialPrompt,
) -> String {
    let mut parts = vec![
        hidden("rid", rid.as_str()),
        hidden("authsp", prompt.authsp.as_str()),
        hidden("retry_counter", &prompt.retry_counter),
        hidden("signature", &prompt.signature),
    ];

    if let Some(message) = &prompt.message {
        parts.insert(0, format!(r#"<p class="message">{}</p>"#, html_escape(message)));
    }

    match (&prompt.sub_session, &prompt.challenge) {
        (Some(handle), challenge) => {
            parts.push(hidden("sub_session", handle));
            if let Some(challenge) = challenge {
                parts.push(format!(r#"<p class="challenge">{}</p>"#, html_escape(challenge)));
            }
            parts.push(text_input(RESPONSE_FIELD));
        }
        (None, _) => {
            match &prompt.uid {
                Some(uid) => parts.push(format!(
                    r#"<p>User: {}</p>{}"#,
                    html_escape(uid),
                    hidden("uid", uid)
                )),
                None => parts.push(text_input("uid")),
            }
            for key in &descriptor.required_keys {
                parts.push(text_input(key));
            }
        }
    }

    parts.push(r#"<input type="submit" value="Log in"/>"#.to_string());
    parts.push(r#"<input type="submit" name="cancel" value="Cancel"/>"#.to_string());

    let body = format!(
        r#"<h1>{}</h1>
<form method="POST" action="{}">
{}
</form>"#,
        html_escape(&descriptor.friendly_name),
        html_escape(action),
        parts.join("\n")
    );
    page(&descriptor.friendly_name, &body)
}

/// Choice between the eligible AuthSPs and peer organizations.
#[must_use]
pub fn selection_form(
    authsp_action: &str,
    organization_action: &str,
    rid: &Rid,
    authsps: &[std::sync::Arc<AuthspDescriptor>],
    organizations: &[&OrganizationDescriptor],
) -> String {
    let mut body = String::from("<h1>Choose how to log in</h1>\n");

    if !authsps.is_empty() {
        let buttons: Vec<String> = authsps
            .iter()
            .map(|authsp| {
                format!(
                    r#"<button type="submit" name="authsp" value="{}">{}</button>"#,
                    html_escape(authsp.id.as_str()),
                    html_escape(&authsp.friendly_name)
                )
            })
            .collect();
        body.push_str(&format!(
            "<form method=\"POST\" action=\"{}\">\n{}\n{}\n<input type=\"submit\" name=\"cancel\" value=\"Cancel\"/>\n</form>\n",
            html_escape(authsp_action),
            hidden("rid", rid.as_str()),
            buttons.join("\n")
        ));
    }

    if !organizations.is_empty() {
        let buttons: Vec<String> = organizations
            .iter()
            .map(|org| {
                format!(
                    r#"<button type="submit" name="organization" value="{}">{}</button>"#,
                    html_escape(org.id.as_str()),
                    html_escape(org.display_name())
                )
            })
            .collect();
        body.push_str(&format!(
            "<form method=\"POST\" action=\"{}\">\n{}\n{}\n</form>\n",
            html_escape(organization_action),
            hidden("rid", rid.as_str()),
            buttons.join("\n")
        ));
    }

    page("Log in", &body)
}

/// Error page shown when the broker itself reports a failure.
#[must_use]
pub fn error_page(code: ResultCode, message: &str) -> String {
    let body = format!(
        r#"<h1>Login failed</h1>
<p>{}</p>
<p>Result code: <code>{}</code></p>"#,
        html_escape(message),
        code.as_str()
    );
    page("Login failed", &body)
}

#[must_use]
pub fn logout_page() -> String {
    page("Logged out", "<h1>You have been logged out</h1>")
}
