//! Topology discoverer.
//!
//! A one-shot fetch of the seed node's own node list (`?nodes=1`), LQM
//! tracker table (`?lqm=1`), and plain link_info document (`?link_info=1`),
//! from which the initial candidate set and seed link map are built.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{info, warn};

use crate::fetch::fetch_first_json;
use crate::model::{LinkMap, LinkRecord, LinkType};
use crate::sysinfo::parse_link_info;

const DISCOVER_RETRIES: u32 = 1;

fn seed_candidate_urls(seed_host: &str, query: &str) -> Vec<String> {
    vec![
        format!("http://{seed_host}/a/sysinfo?{query}"),
        format!("http://{seed_host}:8080/a/sysinfo?{query}"),
        format!("http://{seed_host}/cgi-bin/sysinfo.json?{query}"),
        format!("http://{seed_host}:8080/cgi-bin/sysinfo.json?{query}"),
    ]
}

/// One entry in the discovered candidate set, before polling.
#[derive(Debug, Clone)]
pub struct CandidateNode {
    pub ip: String,
    /// `Some(1)` for directly discovered nodes; `None` for entries
    /// synthesised only via a neighbour's link report (never polled).
    pub hops_away: Option<u32>,
    pub lat: f64,
    pub lon: f64,
    pub is_localnode: bool,
}

/// Result of a topology discovery pass.
#[derive(Debug, Clone, Default)]
pub struct TopologyBundle {
    pub nodes: Vec<CandidateNode>,
    /// Only the seed's own outgoing links are populated here; every other
    /// node's link map is empty until its own poll in this cycle.
    pub links: HashMap<String, LinkMap>,
}

fn as_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve the seed's own IP by scanning its sysinfo `interfaces` array:
/// prefer a `br-nomesh` 10.x address, else the first non-"none" 10.x, else
/// any non-"none" address.
fn resolve_seed_ip(seed_doc: &Value) -> Option<String> {
    let interfaces = seed_doc.get("interfaces")?.as_array()?;
    let ip_of = |iface: &Value| -> Option<String> {
        let ip = iface.get("ip").map(as_str).unwrap_or_default();
        if ip.is_empty() || ip == "none" {
            None
        } else {
            Some(ip)
        }
    };

    for iface in interfaces {
        if iface.get("name").map(as_str).as_deref() == Some("br-nomesh") {
            if let Some(ip) = ip_of(iface) {
                if ip.starts_with("10.") {
                    return Some(ip);
                }
            }
        }
    }
    for iface in interfaces {
        if let Some(ip) = ip_of(iface) {
            if ip.starts_with("10.") {
                return Some(ip);
            }
        }
    }
    for iface in interfaces {
        if let Some(ip) = ip_of(iface) {
            return Some(ip);
        }
    }
    None
}

/// Build the seed link map from LQM `trackers` (an arbitrary-keyed
/// mapping). Destination IP is `canonical_ip` if present else `ip`.
fn parse_lqm_trackers(lqm_doc: &Value) -> Option<LinkMap> {
    let trackers = lqm_doc.get("trackers")?.as_object()?;
    if trackers.is_empty() {
        return None;
    }
    let mut map = LinkMap::new();
    for tracker in trackers.values() {
        let dest_ip = tracker
            .get("canonical_ip")
            .or_else(|| tracker.get("ip"))
            .map(as_str);
        let Some(dest_ip) = dest_ip else { continue };
        let link_type_raw = tracker.get("type").map(as_str).unwrap_or_default();
        let link = LinkRecord {
            link_type: if link_type_raw.is_empty() {
                None
            } else {
                Some(LinkType::normalise(&link_type_raw))
            },
            rxcost: tracker.get("rxcost").and_then(Value::as_f64),
            txcost: tracker.get("txcost").and_then(Value::as_f64),
            rtt: tracker.get("rtt").and_then(Value::as_f64),
            quality: tracker.get("quality").and_then(Value::as_f64),
            hostname: tracker.get("hostname").map(as_str),
            lat: tracker.get("lat").and_then(Value::as_f64),
            lon: tracker.get("lon").and_then(Value::as_f64),
            ..Default::default()
        };
        map.insert(dest_ip, link);
    }
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Run topology discovery against the configured seed host.
pub async fn discover(client: &reqwest::Client, seed_host: &str) -> Option<TopologyBundle> {
    let nodes_urls = seed_candidate_urls(seed_host, "nodes=1");
    let lqm_urls = seed_candidate_urls(seed_host, "lqm=1");
    let link_info_urls = seed_candidate_urls(seed_host, "link_info=1");

    let nodes_doc = fetch_first_json(client, &nodes_urls, DISCOVER_RETRIES).await?;
    let lqm_doc = fetch_first_json(client, &lqm_urls, DISCOVER_RETRIES).await;
    let link_info_doc = fetch_first_json(client, &link_info_urls, DISCOVER_RETRIES).await;

    let node_list: Vec<String> = nodes_doc
        .get("nodes")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(as_str).collect())
        .unwrap_or_default();

    let mut nodes: Vec<CandidateNode> = node_list
        .into_iter()
        .map(|ip| CandidateNode {
            ip,
            hops_away: Some(1),
            lat: 0.0,
            lon: 0.0,
            is_localnode: false,
        })
        .collect();

    let seed_ip = resolve_seed_ip(&nodes_doc);
    if let Some(seed_ip) = &seed_ip {
        if !nodes.iter().any(|n| &n.ip == seed_ip) {
            info!("discover: seed {seed_ip} absent from its own node list, appending as localnode");
            nodes.push(CandidateNode {
                ip: seed_ip.clone(),
                hops_away: Some(1),
                lat: nodes_doc.get("lat").and_then(Value::as_f64).unwrap_or(0.0),
                lon: nodes_doc.get("lon").and_then(Value::as_f64).unwrap_or(0.0),
                is_localnode: true,
            });
        }
    } else {
        warn!("discover: could not resolve seed's own IP from interfaces");
    }

    let seed_links = lqm_doc
        .as_ref()
        .and_then(parse_lqm_trackers)
        .or_else(|| link_info_doc.as_ref().map(parse_link_info))
        .unwrap_or_default();

    let mut links = HashMap::new();
    if let Some(seed_ip) = seed_ip {
        links.insert(seed_ip, seed_links);
    }

    Some(TopologyBundle { nodes, links })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seed_ip_prefers_br_nomesh() {
        let doc = json!({
            "interfaces": [
                {"name": "eth0", "ip": "10.1.1.9"},
                {"name": "br-nomesh", "ip": "10.1.1.1"},
            ]
        });
        assert_eq!(resolve_seed_ip(&doc), Some("10.1.1.1".to_string()));
    }

    #[test]
    fn seed_ip_falls_back_to_any_non_none() {
        let doc = json!({"interfaces": [{"name": "eth2", "ip": "192.168.1.1"}]});
        assert_eq!(resolve_seed_ip(&doc), Some("192.168.1.1".to_string()));
    }

    #[test]
    fn lqm_trackers_prefer_canonical_ip() {
        let doc = json!({
            "trackers": {
                "t1": {"canonical_ip": "10.1.1.2", "ip": "10.1.1.99", "type": "rf"},
            }
        });
        let map = parse_lqm_trackers(&doc).unwrap();
        assert!(map.contains_key("10.1.1.2"));
        assert_eq!(map["10.1.1.2"].link_type, Some(LinkType::Rf));
    }

    #[test]
    fn lqm_empty_trackers_yields_none() {
        let doc = json!({"trackers": {}});
        assert!(parse_lqm_trackers(&doc).is_none());
    }
}
