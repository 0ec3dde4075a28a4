//! JAAS configuration string construction and validation (spec §4.9).

use tp_core::error::{ErrorKind, TestProbeError};

/// Escape a value for embedding inside a double-quoted JAAS parameter
/// (spec §4.9 escaping rules). Order matters: backslashes must be escaped
/// before quotes, or a literal backslash-quote pair would be re-escaped.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse of `escape`, used by the round-trip test (spec §8 property 10).
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Build the OAuthBearer JAAS config string (spec §4.9).
pub fn build(
    client_id: &str,
    client_secret: &str,
    token_endpoint: &str,
    scope: Option<&str>,
) -> Result<String, TestProbeError> {
    let parsed = url::Url::parse(token_endpoint).map_err(|e| {
        TestProbeError::new(
            ErrorKind::VaultMapping,
            format!("invalid oauth.token.endpoint.uri {token_endpoint}: {e}"),
        )
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(TestProbeError::new(
            ErrorKind::VaultMapping,
            format!("oauth.token.endpoint.uri must be http(s): {token_endpoint}"),
        ));
    }

    let mut out = String::new();
    out.push_str("org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule required\n");
    out.push_str(&format!("  oauth.client.id=\"{}\"\n", escape(client_id)));
    out.push_str(&format!(
        "  oauth.client.secret=\"{}\"\n",
        escape(client_secret)
    ));
    out.push_str(&format!(
        "  oauth.token.endpoint.uri=\"{token_endpoint}\"\n"
    ));
    if let Some(scope) = scope {
        out.push_str(&format!("  oauth.scope=\"{}\"\n", escape(scope)));
    }
    out.push(';');
    Ok(out)
}

/// Validate a received JAAS string per spec §4.9: presence of the login
/// module, `required`, a final semicolon, and all three mandatory
/// parameters.
pub fn validate(jaas: &str) -> Result<(), TestProbeError> {
    let checks = [
        (
            jaas.contains("OAuthBearerLoginModule"),
            "missing OAuthBearerLoginModule",
        ),
        (jaas.contains("required"), "missing 'required'"),
        (jaas.trim_end().ends_with(';'), "missing trailing semicolon"),
        (jaas.contains("oauth.client.id="), "missing oauth.client.id"),
        (
            jaas.contains("oauth.client.secret="),
            "missing oauth.client.secret",
        ),
        (
            jaas.contains("oauth.token.endpoint.uri="),
            "missing oauth.token.endpoint.uri",
        ),
    ];

    for (ok, message) in checks {
        if !ok {
            return Err(TestProbeError::new(ErrorKind::VaultMapping, message.to_string()));
        }
    }
    Ok(())
}

/// Parse `client_id`/`client_secret` back out of a JAAS string built by
/// `build`, used only by the round-trip test (spec §8 property 10) — a
/// real Kafka client never needs this, it only ever consumes the string.
fn parse_id_and_secret(jaas: &str) -> Option<(String, String)> {
    let id = extract_quoted(jaas, "oauth.client.id=\"")?;
    let secret = extract_quoted(jaas, "oauth.client.secret=\"")?;
    Some((unescape(&id), unescape(&secret)))
}

fn extract_quoted(haystack: &str, marker: &str) -> Option<String> {
    let start = haystack.find(marker)? + marker.len();
    let rest = &haystack[start..];
    let mut out = String::new();
    let mut chars = rest.chars();
    loop {
        match chars.next()? {
            '\\' => {
                out.push('\\');
                out.push(chars.next()?);
            }
            '"' => return Some(out),
            c => out.push(c),
        }
    }
}
