//! Terminal dispatchers: GET/HEAD, SOURCE/PUT, and STATS classification
//! and routing, including alias rewriting, X-Forwarded-For substitution,
//! and the global client-limit gate.

use std::net::IpAddr;

use crate::auth::select_and_verify;
use crate::client::{ClientFlags, ParsedRequest};
use crate::config::Config;
use crate::error::CoreError;
use crate::handlers::Route;

fn is_admin_path(uri: &str) -> bool {
    uri == "/admin.cgi" || uri.starts_with("/admin/")
}

/// Substitute the immediate peer IP for the `X-Forwarded-For` header's
/// first address, but only when the immediate peer is a configured trusted
/// forwarder (property 9: X-Forwarded-For gating).
#[must_use]
pub fn effective_peer_ip(request: &ParsedRequest, immediate_peer: IpAddr, config: &Config) -> IpAddr {
    if !config.is_trusted_forwarder(&immediate_peer) {
        return immediate_peer;
    }
    request
        .header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(immediate_peer)
}

/// Rewrite `uri` through the first matching alias entry, if any.
#[must_use]
pub fn apply_alias(uri: &str, config: &Config) -> String {
    match config.find_alias(uri) {
        Some(alias) => alias.destination.clone(),
        None => uri.to_string(),
    }
}

fn sets_flv_hint(uri: &str, query: Option<&str>) -> bool {
    if uri.ends_with(".flv") {
        return true;
    }
    match query.and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("type="))) {
        Some(t) => t == ".flv" || t == ".fla",
        None => false,
    }
}

fn is_access_log_excluded(uri: &str, exclude_ext: &[String]) -> bool {
    let ext = uri.rsplit('.').next().unwrap_or("");
    exclude_ext.iter().any(|e| e.trim_start_matches('.') == ext)
}

/// Classify and route a GET/HEAD request. `client_count` is the current
/// global accepted-client count, consulted against `config.client_limit`.
pub fn dispatch_get(
    request: &ParsedRequest,
    immediate_peer: IpAddr,
    config: &Config,
    client_count: usize,
    flags: &mut ClientFlags,
) -> Result<Route, CoreError> {
    let uri = apply_alias(&request.uri, config);

    flags.wants_flv = sets_flv_hint(&uri, request.query.as_deref());
    flags.skip_accesslog = is_access_log_excluded(&uri, &config.access_log_exclude_ext);

    let peer = effective_peer_ip(request, immediate_peer, config);

    if is_admin_path(&uri) {
        return Ok(Route::Admin);
    }

    if let Some(limit) = config.client_limit {
        if client_count > limit {
            return Err(CoreError::AdmissionDenied("client limit exceeded"));
        }
    }

    Ok(Route::ListenerAttach { uri, peer })
}

/// Outcome of a SOURCE/PUT auth check, mirroring the source's three-way
/// result (0 = attach, 1 = auth pending, else = reject).
pub enum SourceAuthOutcome {
    Attach,
    Pending,
    Denied,
}

pub fn dispatch_source(
    request: &ParsedRequest,
    immediate_peer: IpAddr,
    config: &Config,
) -> Result<(Route, SourceAuthOutcome), CoreError> {
    if !request.uri.starts_with('/') {
        return Err(CoreError::ParseFailure("source uri must start with /".into()));
    }
    let peer = effective_peer_ip(request, immediate_peer, config);

    let source_password = config.source_password.as_deref().unwrap_or("");
    let user = config.relay_user.as_deref().unwrap_or("source");
    let authenticated = select_and_verify(request, user, source_password, config.ice_login);

    if request.header("expect").map(|v| v.eq_ignore_ascii_case("100-continue")).unwrap_or(false) {
        return Ok((Route::SourceAttach { uri: request.uri.clone(), peer }, SourceAuthOutcome::Pending));
    }

    if authenticated {
        Ok((Route::SourceAttach { uri: request.uri.clone(), peer }, SourceAuthOutcome::Attach))
    } else {
        Ok((Route::SourceAttach { uri: request.uri.clone(), peer }, SourceAuthOutcome::Denied))
    }
}

pub fn dispatch_stats(request: &ParsedRequest, immediate_peer: IpAddr, config: &Config) -> Route {
    let admin_user = config.admin_user.as_deref().unwrap_or("");
    let admin_password = config.admin_password.as_deref().unwrap_or("");
    if request
        .header("authorization")
        .is_some_and(|h| crate::auth::verify_basic(h, admin_user, admin_password))
    {
        return Route::StatsFull;
    }

    if request.uri == "/admin/streams" {
        let relay_user = config.relay_user.as_deref().unwrap_or("");
        let relay_password = config.relay_password.as_deref().unwrap_or("");
        if request
            .header("authorization")
            .is_some_and(|h| crate::auth::verify_basic(h, relay_user, relay_password))
        {
            return Route::StatsSlave;
        }
    }

    let peer = effective_peer_ip(request, immediate_peer, config);
    Route::ListenerAttach { uri: request.uri.clone(), peer }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_limit(limit: Option<usize>) -> Config {
        let mut cfg: Config = serde_yaml::from_str("listeners: []\n").unwrap();
        cfg.client_limit = limit;
        cfg
    }

    fn get_request(uri: &str) -> ParsedRequest {
        ParsedRequest { method: "GET".into(), uri: uri.into(), protocol: "HTTP".into(), version: "1.1".into(), ..ParsedRequest::default() }
    }

    #[test]
    fn client_limit_exempts_admin_paths() {
        let config = config_with_limit(Some(5));
        let mut flags = ClientFlags::default();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        let admin = dispatch_get(&get_request("/admin/stats"), peer, &config, 10, &mut flags);
        assert!(matches!(admin, Ok(Route::Admin)));

        let stream = dispatch_get(&get_request("/stream.ogg"), peer, &config, 10, &mut flags);
        assert!(matches!(stream, Err(CoreError::AdmissionDenied(_))));
    }

    #[test]
    fn flv_hint_from_extension_or_query() {
        let config = config_with_limit(None);
        let mut flags = ClientFlags::default();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        dispatch_get(&get_request("/video.flv"), peer, &config, 0, &mut flags).unwrap();
        assert!(flags.wants_flv);

        let mut flags2 = ClientFlags::default();
        let mut with_query = get_request("/video");
        with_query.query = Some("type=.flv".into());
        dispatch_get(&with_query, peer, &config, 0, &mut flags2).unwrap();
        assert!(flags2.wants_flv);
    }

    #[test]
    fn xff_substitution_requires_trusted_forwarder() {
        let mut config = config_with_limit(None);
        config.xforward = vec!["10.0.0.1".parse().unwrap()];
        let mut request = get_request("/stream.ogg");
        request.headers.push(("X-Forwarded-For".into(), "1.2.3.4".into()));

        let trusted: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(effective_peer_ip(&request, trusted, &config), "1.2.3.4".parse::<IpAddr>().unwrap());

        let untrusted: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(effective_peer_ip(&request, untrusted, &config), untrusted);
    }
}
