//! The request-assembly state machine: drives a client's read buffer to a
//! parsed, classified request and hands it to a terminal dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::client::{Client, ClientState, ParsedRequest, Refbuf};
use crate::config::Config;
use crate::dispatch::{dispatch_get, dispatch_source, dispatch_stats, SourceAuthOutcome};
use crate::error::CoreError;
use crate::filter::FilterStore;
use crate::handlers::TerminalHandlers;
use crate::parser::parse_request;
use crate::shoutcast;

/// Exact prefix recognized as the Flash cross-domain policy probe.
const FLASH_POLICY_PREFIX: &[u8] = b"<policy-file-request/>";

const FLAT_RESCHEDULE: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

const OPTIONS_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nAllow: GET, HEAD, SOURCE, PUT, STATS, OPTIONS\r\nContent-Length: 0\r\n\r\n";
const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        501 => "Not Implemented",
        _ => "Error",
    }
}

fn canned_status_response(status: u16) -> Refbuf {
    let body = format!(
        "HTTP/1.1 {status} {}\r\nContent-Length: 0\r\n\r\n",
        reason_phrase(status)
    );
    Refbuf::from_bytes(BytesMut::from(body.as_bytes()))
}

/// Outcome of one [`step`] call. `Client` ownership moves with it: the
/// worker keeps stepping `Continue`'s client, and stops touching it on
/// either of the other two (a `Dropped` client is torn down by the worker;
/// a `HandedOff` one now belongs to the terminal handler it was passed to).
pub enum StepOutcome {
    Continue(Client),
    Dropped,
    /// Classified and passed to an external terminal-handler module
    /// (admin/fileserve/source/stats) via [`TerminalHandlers`].
    HandedOff,
    /// Answered directly with a canned response (OPTIONS, 501, the Flash
    /// policy file); the worker keeps driving the send and any subsequent
    /// keep-alive cycle.
    Responded(Client),
}

/// Elapsed-time-scaled backoff: `min(200, elapsed_ms / 2) + 6` ms.
fn backoff_delay(created_at: Instant) -> Duration {
    let elapsed_ms = created_at.elapsed().as_millis() as u64;
    Duration::from_millis((elapsed_ms / 2).min(200) + 6)
}

fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(idx) = find_subslice(buf, b"\r\n\r\n") {
        return Some((idx, idx + 4));
    }
    if let Some(idx) = find_subslice(buf, b"\n\n") {
        return Some((idx, idx + 2));
    }
    if let Some(idx) = find_subslice(buf, b"\r\r\n\r\r\n") {
        return Some((idx, idx + 6));
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Drive one step of request assembly for `client`, consuming it and
/// returning it back inside `StepOutcome::Continue` if assembly isn't
/// finished yet.
pub async fn step(
    client: Client,
    config: &Config,
    filters: &FilterStore,
    handlers: &Arc<dyn TerminalHandlers>,
    client_count: usize,
) -> Result<StepOutcome, CoreError> {
    match client.state {
        ClientState::ShoutcastIntro => step_shoutcast_intro(client).await,
        ClientState::RequestRead => step_request_read(client, config, filters, handlers, client_count).await,
        _ => Ok(StepOutcome::HandedOff),
    }
}

async fn fill_buffer(client: &mut Client) -> Result<usize, CoreError> {
    let buf = client.shared_data.as_mut().expect("shared_data present while assembling a request");
    let mut chunk = [0u8; READ_CHUNK];
    let n = client.connection.read(&mut chunk).await?;
    if n > 0 {
        buf.data.extend_from_slice(&chunk[..n]);
    }
    Ok(n)
}

async fn step_shoutcast_intro(mut client: Client) -> Result<StepOutcome, CoreError> {
    let now = Instant::now();
    if client.is_past_deadline(now) {
        return Ok(StepOutcome::Dropped);
    }

    let n = match fill_buffer(&mut client).await {
        Ok(n) => n,
        Err(CoreError::Transient) => {
            client.reschedule_in(backoff_delay(client.created_at));
            return Ok(StepOutcome::Continue(client));
        }
        Err(e) => return Err(e),
    };
    if n == 0 {
        return Ok(StepOutcome::Dropped);
    }

    let mount = client.listener.shoutcast_mount.clone().unwrap_or_else(|| "/stream".to_string());
    let intro = client.shared_data.as_ref().unwrap().data.clone();

    match shoutcast::translate(&intro, &mount) {
        Some(mut response) => {
            let synthesized = response.take_associated();
            client.refbuf = Some(response);
            if let Err(e) = client.flush_refbuf().await {
                client.connection.set_error();
                return Err(e);
            }
            client.shared_data = synthesized;
            client.state = ClientState::RequestRead;
            Ok(StepOutcome::Continue(client))
        }
        None => {
            client.reschedule_in(FLAT_RESCHEDULE);
            Ok(StepOutcome::Continue(client))
        }
    }
}

async fn step_request_read(
    mut client: Client,
    config: &Config,
    filters: &FilterStore,
    handlers: &Arc<dyn TerminalHandlers>,
    client_count: usize,
) -> Result<StepOutcome, CoreError> {
    let now = Instant::now();
    if client.is_past_deadline(now) {
        return Ok(StepOutcome::Dropped);
    }

    let capacity = client.shared_data.as_ref().map(|b| b.data.capacity()).unwrap_or(0);
    let len_before = client.shared_data.as_ref().map(|b| b.data.len()).unwrap_or(0);

    if len_before >= capacity.saturating_sub(1) {
        return Ok(StepOutcome::Dropped);
    }

    match fill_buffer(&mut client).await {
        Ok(0) => return Ok(StepOutcome::Dropped),
        Ok(_) => {}
        Err(CoreError::Transient) => {
            client.reschedule_in(backoff_delay(client.created_at));
            return Ok(StepOutcome::Continue(client));
        }
        Err(e) => return Err(e),
    }

    let starts_with_policy = client
        .shared_data
        .as_ref()
        .map(|b| b.data.starts_with(FLASH_POLICY_PREFIX))
        .unwrap_or(false);

    if starts_with_policy {
        handlers.serve_flashpolicy(client).await;
        return Ok(StepOutcome::HandedOff);
    }

    let found = find_terminator(&client.shared_data.as_ref().unwrap().data);
    let Some((header_len, total_consumed)) = found else {
        client.reschedule_in(FLAT_RESCHEDULE);
        return Ok(StepOutcome::Continue(client));
    };

    let (header_block, trailing) = {
        let buf = &client.shared_data.as_ref().unwrap().data;
        (buf[..header_len].to_vec(), buf[total_consumed..].to_vec())
    };

    let parsed = match parse_request(&header_block) {
        Ok(p) => p,
        Err(_) => {
            client.refbuf = Some(canned_status_response(400));
            client.shared_data = None;
            return Ok(StepOutcome::Responded(client));
        }
    };

    if let Some(ua) = parsed.header("user-agent") {
        if filters.agent_denied(ua) {
            return Ok(StepOutcome::Dropped);
        }
    }

    if parsed.protocol != "ICE" && parsed.protocol != "HTTP" {
        return Ok(StepOutcome::Dropped);
    }

    client.flags.keepalive = parsed.version == "1.1";
    if let Some(conn_header) = parsed.header("connection") {
        client.flags.keepalive = conn_header.eq_ignore_ascii_case("keep-alive");
    }

    classify_and_dispatch(client, parsed, trailing, config, handlers, client_count).await
}

async fn classify_and_dispatch(
    mut client: Client,
    parsed: ParsedRequest,
    trailing: Vec<u8>,
    config: &Config,
    handlers: &Arc<dyn TerminalHandlers>,
    client_count: usize,
) -> Result<StepOutcome, CoreError> {
    let peer_ip = peer_ip_of(&client);

    match parsed.method.as_str() {
        "HEAD" | "GET" => {
            let route = match dispatch_get(&parsed, peer_ip, config, client_count, &mut client.flags) {
                Ok(route) => route,
                Err(CoreError::AdmissionDenied(_)) => {
                    client.refbuf = Some(canned_status_response(403));
                    client.shared_data = None;
                    return Ok(StepOutcome::Responded(client));
                }
                Err(_) => return Ok(StepOutcome::Dropped),
            };
            client.state = ClientState::GetHandler(parsed);
            handlers.dispatch(client, route).await;
            Ok(StepOutcome::HandedOff)
        }
        "SOURCE" | "PUT" => source_setup(client, parsed, trailing, config, handlers).await,
        "STATS" => {
            let route = dispatch_stats(&parsed, peer_ip, config);
            client.state = ClientState::StatsHandler(parsed);
            handlers.dispatch(client, route).await;
            Ok(StepOutcome::HandedOff)
        }
        "OPTIONS" => {
            client.refbuf = Some(Refbuf::from_bytes(BytesMut::from(OPTIONS_RESPONSE)));
            client.shared_data = None;
            Ok(StepOutcome::Responded(client))
        }
        _ => {
            client.refbuf = Some(canned_status_response(501));
            client.shared_data = None;
            Ok(StepOutcome::Responded(client))
        }
    }
}

async fn source_setup(
    mut client: Client,
    parsed: ParsedRequest,
    trailing: Vec<u8>,
    config: &Config,
    handlers: &Arc<dyn TerminalHandlers>,
) -> Result<StepOutcome, CoreError> {
    let expects_continue = parsed
        .header("expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));

    if expects_continue {
        client.refbuf = Some(Refbuf::from_bytes(BytesMut::from(CONTINUE_RESPONSE)));
    }

    // The bytes that followed the header terminator arrived early from the
    // source and must reach the source handler's first read before any
    // further socket read does.
    client.shared_data = Some(Refbuf::from_bytes(BytesMut::from(&trailing[..])));

    let peer_ip = peer_ip_of(&client);
    let (route, outcome) = match dispatch_source(&parsed, peer_ip, config) {
        Ok(r) => r,
        Err(_) => return Ok(StepOutcome::Dropped),
    };

    match outcome {
        SourceAuthOutcome::Denied => {
            client.refbuf = Some(canned_status_response(401));
            client.shared_data = None;
            return Ok(StepOutcome::Responded(client));
        }
        SourceAuthOutcome::Attach | SourceAuthOutcome::Pending => {}
    }

    client.state = ClientState::SourceHandler(parsed);
    handlers.dispatch(client, route).await;
    Ok(StepOutcome::HandedOff)
}

fn peer_ip_of(client: &Client) -> std::net::IpAddr {
    client.connection.peer_ip.parse().unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_priority_prefers_crlfcrlf() {
        let buf = b"GET / HTTP/1.0\r\n\r\nbody";
        assert_eq!(find_terminator(buf), Some((14, 18)));
    }

    #[test]
    fn terminator_accepts_lf_only() {
        let buf = b"GET / HTTP/1.0\n\nbody";
        assert_eq!(find_terminator(buf), Some((14, 16)));
    }

    #[test]
    fn terminator_accepts_crcrlfcrcrlf() {
        let buf = b"GET / HTTP/1.0\r\r\n\r\r\nbody";
        assert_eq!(find_terminator(buf), Some((14, 20)));
    }

    #[test]
    fn flash_policy_prefix_detected_before_parsing() {
        let buf = b"<policy-file-request/>\0";
        assert!(buf.starts_with(FLASH_POLICY_PREFIX));
    }

    #[test]
    fn backoff_delay_caps_at_206ms() {
        let created = Instant::now() - Duration::from_secs(10);
        let delay = backoff_delay(created);
        assert_eq!(delay, Duration::from_millis(206));
    }
}
