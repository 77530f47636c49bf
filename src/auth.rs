//! Authentication verifiers consulted by the terminal dispatchers. Each
//! returns a plain boolean; selecting which one applies is the caller's job
//! (see [`select_and_verify`]).

use base64::Engine as _;

use crate::client::ParsedRequest;

/// HTTP Basic, tolerating an optional `Basic ` prefix. A missing colon in
/// the decoded credentials is a failure, not a parse error.
#[must_use]
pub fn verify_basic(header_value: &str, user: &str, password: &str) -> bool {
    let encoded = header_value.strip_prefix("Basic ").unwrap_or(header_value);
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((got_user, got_password)) = decoded.split_once(':') else {
        return false;
    };
    got_user == user && got_password == password
}

/// ICY protocol auth: a single `icy-password` field compared directly.
#[must_use]
pub fn verify_icy(icy_password_header: &str, password: &str) -> bool {
    icy_password_header == password
}

/// Legacy `ice-password` header. Deprecated: callers should log a warning
/// on a successful match so operators notice lingering old-style sources.
#[must_use]
pub fn verify_legacy_ice_password(header_value: &str, password: &str) -> bool {
    header_value == password
}

/// Pick the verifier implied by `request.protocol` and run it.
///
/// `ice_login` enables the legacy `ice-password` fallback when HTTP Basic
/// is absent, per the `ice-login` configuration key.
#[must_use]
pub fn select_and_verify(request: &ParsedRequest, user: &str, password: &str, ice_login: bool) -> bool {
    if request.protocol == "ICY" {
        return request.header("icy-password").is_some_and(|v| verify_icy(v, password));
    }

    if let Some(auth) = request.header("authorization") {
        if verify_basic(auth, user, password) {
            return true;
        }
    }

    if ice_login {
        if let Some(legacy) = request.header("ice-password") {
            let ok = verify_legacy_ice_password(legacy, password);
            if ok {
                tracing::warn!("source authenticated via deprecated ice-password header");
            }
            return ok;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_round_trips() {
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("source:hunter2")
        );
        assert!(verify_basic(&header, "source", "hunter2"));
        assert!(!verify_basic(&header, "source", "wrong"));
    }

    #[test]
    fn basic_auth_rejects_missing_colon() {
        let header = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("nocolon"));
        assert!(!verify_basic(&header, "source", "hunter2"));
    }

    #[test]
    fn icy_auth_is_a_direct_comparison() {
        assert!(verify_icy("hunter2", "hunter2"));
        assert!(!verify_icy("hunter3", "hunter2"));
    }

    #[test]
    fn selects_legacy_header_only_when_enabled() {
        let request = ParsedRequest {
            protocol: "HTTP".into(),
            headers: vec![("ice-password".into(), "hunter2".into())],
            ..ParsedRequest::default()
        };
        assert!(!select_and_verify(&request, "u", "hunter2", false));
        assert!(select_and_verify(&request, "u", "hunter2", true));
    }
}
