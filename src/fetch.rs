//! Retrying, timeout-bounded JSON GET over a pooled `reqwest::Client`.
//!
//! A single attempt uses a total-deadline timeout,
//! accepts only HTTP 200, strips non-printable bytes before decoding, and
//! parses JSON. Timeouts are retried after a fixed delay; any other failure
//! (connection refused, non-200, malformed JSON) returns `None` immediately
//! — it is not worth retrying a host that is actively responding with
//! garbage.

use std::time::Duration;

use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Build the shared client used for all node and topology fetches.
/// `per_host_cap` bounds idle connections kept open per host; the total
/// in-flight cap is enforced by the coordinator's semaphore, not here.
pub fn build_client(per_host_cap: usize) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(per_host_cap)
        .timeout(DEFAULT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

/// Strip bytes that are neither printable ASCII/UTF-8 continuation bytes
/// nor `\n`, `\r`, `\t`. Some AREDN firmware emits sysinfo documents with
/// stray control bytes that trip up a strict JSON parser.
fn sanitize(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7e).contains(&b) || b >= 0x80)
        .collect()
}

/// Fetch `url` as JSON, retrying up to `retries` additional times on
/// timeout. Returns `None` on any non-recoverable failure.
pub async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    retries: u32,
) -> Option<serde_json::Value> {
    let mut attempt = 0;
    loop {
        match client.get(url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                let bytes = match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => {
                        debug!("fetch_json: body read failed for {url}: {e}");
                        return None;
                    }
                };
                let cleaned = sanitize(&bytes);
                return match serde_json::from_slice(&cleaned) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        debug!("fetch_json: malformed JSON from {url}: {e}");
                        None
                    }
                };
            }
            Ok(resp) => {
                debug!("fetch_json: non-200 ({}) from {url}", resp.status());
                return None;
            }
            Err(e) if e.is_timeout() && attempt < retries => {
                attempt += 1;
                debug!("fetch_json: timeout on {url}, retry {attempt}/{retries}");
                tokio::time::sleep(DEFAULT_RETRY_DELAY).await;
                continue;
            }
            Err(e) if e.is_timeout() => {
                debug!("fetch_json: timeout on {url}, retries exhausted");
                return None;
            }
            Err(e) => {
                debug!("fetch_json: request failed for {url}: {e}");
                return None;
            }
        }
    }
}

/// Try a fixed, ordered list of candidate URLs and return the first
/// successful JSON response. Used for sysinfo root/`?link_info=1`/
/// `?services_local=1` variants and for the topology discoverer's seed
/// queries.
pub async fn fetch_first_json(
    client: &reqwest::Client,
    candidates: &[String],
    retries: u32,
) -> Option<serde_json::Value> {
    for url in candidates {
        if let Some(v) = fetch_json(client, url, retries).await {
            return Some(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_control_bytes() {
        let input = b"{\"a\":1}\x01\x02".to_vec();
        let out = sanitize(&input);
        assert_eq!(out, b"{\"a\":1}".to_vec());
    }

    #[test]
    fn sanitize_keeps_whitespace_and_utf8() {
        let input = "{\n\t\"a\": \"café\"\r\n}".as_bytes().to_vec();
        let out = sanitize(&input);
        assert_eq!(out, input);
    }
}
