//! Per-IP node polling.
//!
//! Fetches the sysinfo root document (first successful candidate URL
//! wins), then independently fetches `link_info` and `services_local`
//! variants of the same candidate chain. Either may be absent without
//! failing the poll as a whole.

use std::time::Instant;

use tracing::debug;

use crate::fetch::fetch_first_json;
use crate::model::NodeRecord;
use crate::sysinfo::{parse_link_info, parse_services_local, parse_sysinfo};

const SYSINFO_RETRIES: u32 = 1;

fn candidate_urls(ip: &str, suffix: &str) -> Vec<String> {
    vec![
        format!("http://{ip}/a/sysinfo{suffix}"),
        format!("http://{ip}:8080/a/sysinfo{suffix}"),
        format!("http://{ip}/cgi-bin/sysinfo.json{suffix}"),
        format!("http://{ip}:8080/cgi-bin/sysinfo.json{suffix}"),
    ]
}

fn suffixed(ip: &str, query: &str) -> Vec<String> {
    candidate_urls(ip, &format!("?{query}"))
}

/// Board IDs that are always 900MHz regardless of reported channel.
pub(crate) const BOARD_IDS_900MHZ: [&str; 3] = ["0xe009", "0xe1b9", "0xe239"];

/// 5GHz channel set: 37,40,44,48,52,56,60,64,100..184.
fn is_5ghz_channel(channel: i64) -> bool {
    matches!(channel, 37 | 40 | 44 | 48 | 52 | 56 | 60 | 64) || (100..=184).contains(&channel)
}

/// Classify a node's band from its reported channel and board id.
pub fn check_band(channel: &str, board_id: &str) -> &'static str {
    if BOARD_IDS_900MHZ.contains(&board_id.to_ascii_lowercase().as_str()) {
        return "900MHz";
    }
    let Ok(chan) = channel.trim().parse::<i64>() else {
        return "Unknown";
    };
    if chan == -2 || chan == -1 || (1..=11).contains(&chan) {
        "2GHz"
    } else if (76..=99).contains(&chan) {
        "3GHz"
    } else if is_5ghz_channel(chan) {
        "5GHz"
    } else {
        "Unknown"
    }
}

/// Poll a single IP end to end. Returns `None` if the sysinfo document
/// could not be retrieved from any candidate URL — the caller counts this
/// as a failed node, never as a fatal error.
pub async fn poll(client: &reqwest::Client, ip: &str, hops: Option<u32>) -> Option<NodeRecord> {
    let start = Instant::now();

    let sysinfo_candidates = candidate_urls(ip, "");
    let doc = fetch_first_json(client, &sysinfo_candidates, SYSINFO_RETRIES).await?;

    let mut record = parse_sysinfo(&doc, ip)?;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    record.response_time_ms = (elapsed_ms * 100.0).round() / 100.0;

    let effective_ip = record.wlan_ip.clone();

    let link_info_candidates = suffixed(&effective_ip, "link_info=1");
    if let Some(link_doc) = fetch_first_json(client, &link_info_candidates, SYSINFO_RETRIES).await {
        record.link_info = parse_link_info(&link_doc);
    } else {
        debug!("poll({effective_ip}): link_info unavailable");
    }

    let services_candidates = suffixed(&effective_ip, "services_local=1");
    if let Some(services_doc) =
        fetch_first_json(client, &services_candidates, SYSINFO_RETRIES).await
    {
        record.services = parse_services_local(&services_doc);
    } else {
        debug!("poll({effective_ip}): services_local unavailable");
    }

    record.hops_away = hops;
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_900mhz_board_id_wins() {
        assert_eq!(check_band("none", "0xe009"), "900MHz");
    }

    #[test]
    fn band_2ghz_numeric_channel() {
        assert_eq!(check_band("6", ""), "2GHz");
    }

    #[test]
    fn band_3ghz_numeric_channel() {
        assert_eq!(check_band("80", ""), "3GHz");
    }

    #[test]
    fn band_5ghz_numeric_channel() {
        assert_eq!(check_band("149", ""), "5GHz");
    }

    #[test]
    fn band_unknown_for_none_channel() {
        assert_eq!(check_band("none", ""), "Unknown");
    }

    #[test]
    fn candidate_url_order() {
        let urls = candidate_urls("10.1.1.1", "");
        assert_eq!(
            urls,
            vec![
                "http://10.1.1.1/a/sysinfo",
                "http://10.1.1.1:8080/a/sysinfo",
                "http://10.1.1.1/cgi-bin/sysinfo.json",
                "http://10.1.1.1:8080/cgi-bin/sysinfo.json",
            ]
        );
    }
}
