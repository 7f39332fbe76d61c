//! Sysinfo document parser/normaliser.
//!
//! Input is a schema-flexible `serde_json::Value`. Two schema generations
//! are supported: a flat top-level document, and a legacy document that
//! nests the same fields under `node_details`. Interface IP selection is
//! order-sensitive (see `resolve_interfaces`).

use serde_json::Value;

use crate::model::{LinkMap, LinkRecord, LinkType, LoadAverage, NodeRecord, ServiceDescriptor};

fn as_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn field<'a>(doc: &'a Value, legacy: &'a Value, key: &str) -> String {
    doc.get(key)
        .or_else(|| legacy.get(key))
        .map(as_str)
        .unwrap_or_default()
}

fn to_bool_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::String(s)) => {
            let normalised = s == "1" || s.eq_ignore_ascii_case("true");
            normalised.to_string()
        }
        Some(Value::Number(n)) if n.as_i64() == Some(1) => "true".to_string(),
        _ => "false".to_string(),
    }
}

fn coerce_float(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) if !s.is_empty() => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Replace `<br>` (and its `<br/>`/`<BR>` spellings) with a single space.
fn normalise_description(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut lower_rest = lower.as_str();
    loop {
        match lower_rest.find("<br") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(idx) => {
                let tag_end = lower_rest[idx..]
                    .find('>')
                    .map(|e| idx + e + 1)
                    .unwrap_or(lower_rest.len());
                out.push_str(&rest[..idx]);
                out.push(' ');
                rest = &rest[tag_end..];
                lower_rest = &lower_rest[tag_end..];
            }
        }
    }
    out
}

/// Pick the canonical `wlan_ip`/`lan_ip`/`wifi_mac_address` triple out of an
/// `interfaces` array. Order-sensitive: see the priority list below.
struct ResolvedInterfaces {
    wlan_ip: Option<String>,
    lan_ip: Option<String>,
    wifi_mac: Option<String>,
}

fn resolve_interfaces(interfaces: &[Value]) -> ResolvedInterfaces {
    let mut wlan_ip = None;
    let mut lan_ip = None;
    let mut wifi_mac = None;

    let ip_of = |iface: &Value| -> Option<String> {
        let ip = iface.get("ip").map(as_str).unwrap_or_default();
        if ip.is_empty() || ip == "none" {
            None
        } else {
            Some(ip)
        }
    };

    // Primary: wlan0 / wlan1.
    for iface in interfaces {
        let name = iface.get("name").map(as_str).unwrap_or_default();
        if name == "wlan0" || name == "wlan1" {
            if let Some(ip) = ip_of(iface) {
                wlan_ip = Some(ip);
            }
            if let Some(mac) = iface.get("mac").map(as_str) {
                if !mac.is_empty() {
                    wifi_mac = Some(mac);
                }
            }
        }
    }

    // Fallback: eth1.3975, eth0.3975, br-nomesh, br0 — must be 10.x.
    if wlan_ip.is_none() {
        for candidate in ["eth1.3975", "eth0.3975", "br-nomesh", "br0"] {
            for iface in interfaces {
                let name = iface.get("name").map(as_str).unwrap_or_default();
                if name == candidate {
                    if let Some(ip) = ip_of(iface) {
                        if ip.starts_with("10.") {
                            wlan_ip = Some(ip);
                        }
                    }
                }
            }
            if wlan_ip.is_some() {
                break;
            }
        }
    }

    for iface in interfaces {
        let name = iface.get("name").map(as_str).unwrap_or_default();
        if name == "br-lan" {
            if let Some(ip) = ip_of(iface) {
                lan_ip = Some(ip);
            }
        }
    }

    ResolvedInterfaces {
        wlan_ip,
        lan_ip,
        wifi_mac,
    }
}

/// Parse a node's raw `link_info` document (mapping destIP -> link fields)
/// into a `LinkMap`. Used both by the poller (per-node fetch) and the
/// discoverer (seed fallback when LQM trackers are absent).
pub fn parse_link_info(doc: &Value) -> LinkMap {
    let mut map = LinkMap::new();
    let Some(obj) = doc.as_object() else {
        return map;
    };
    for (dest_ip, entry) in obj {
        let link_type_raw = entry
            .get("type")
            .or_else(|| entry.get("linkType"))
            .map(as_str)
            .unwrap_or_default();
        let link = LinkRecord {
            link_type: if link_type_raw.is_empty() {
                None
            } else {
                Some(LinkType::normalise(&link_type_raw))
            },
            olsr_if: entry.get("olsrInterface").map(as_str),
            rxcost: entry.get("rxcost").and_then(Value::as_f64),
            txcost: entry.get("txcost").and_then(Value::as_f64),
            rtt: entry.get("rtt").and_then(Value::as_f64),
            quality: entry.get("quality").and_then(Value::as_f64),
            distance: entry.get("distance").and_then(Value::as_f64),
            hostname: entry.get("hostname").map(as_str),
            lat: entry.get("lat").and_then(Value::as_f64),
            lon: entry.get("lon").and_then(Value::as_f64),
            ..Default::default()
        };
        map.insert(dest_ip.clone(), link);
    }
    map
}

fn parse_services(doc: &Value) -> Vec<ServiceDescriptor> {
    let Some(arr) = doc.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|entry| {
            let name = entry.get("name").map(as_str)?;
            Some(ServiceDescriptor {
                name,
                protocol: entry.get("protocol").map(as_str),
                link: entry.get("link").map(as_str),
            })
        })
        .collect()
}

/// Parse a sysinfo root document into a `NodeRecord`. `fallback_ip` is used
/// as `wlan_ip` when no interface yields one (i.e. the IP the poller was
/// asked to contact in the first place).
///
/// The returned record has empty `link_info`/`services`, `hops_away: None`
/// and `last_seen: None` — the poller fills those in from the separate
/// `link_info`/`services_local` fetches and from cycle context.
pub fn parse_sysinfo(doc: &Value, fallback_ip: &str) -> Option<NodeRecord> {
    if !doc.is_object() {
        return None;
    }
    let legacy = doc.get("node_details").cloned().unwrap_or(Value::Null);
    let sysinfo_obj = doc.get("sysinfo").cloned().unwrap_or(Value::Null);
    let meshrf = doc.get("meshrf").cloned().unwrap_or(Value::Null);
    let antenna = meshrf.get("antenna").cloned().unwrap_or(Value::Null);
    let tunnels = doc.get("tunnels").cloned().unwrap_or(Value::Null);

    let interfaces: Vec<Value> = doc
        .get("interfaces")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let resolved = resolve_interfaces(&interfaces);

    let wlan_ip = resolved.wlan_ip.unwrap_or_else(|| fallback_ip.to_string());

    let uptime = {
        let top = field(doc, &legacy, "uptime");
        if top.is_empty() {
            sysinfo_obj.get("uptime").map(as_str).unwrap_or_default()
        } else {
            top
        }
    };

    let loads = sysinfo_obj
        .get("loads")
        .or_else(|| doc.get("loads"))
        .and_then(Value::as_array)
        .map(|arr| {
            let mut out = [0.0; 3];
            for (i, v) in arr.iter().take(3).enumerate() {
                out[i] = v.as_f64().unwrap_or(0.0);
            }
            LoadAverage(out)
        })
        .unwrap_or_default();

    let lat = coerce_float(doc.get("lat").or_else(|| legacy.get("lat")));
    let lon = coerce_float(doc.get("lon").or_else(|| legacy.get("lon")));

    let description = normalise_description(&field(doc, &legacy, "description"));

    Some(NodeRecord {
        wlan_ip,
        node: field(doc, &legacy, "node"),
        uptime,
        loadavg: loads,
        model: field(doc, &legacy, "model"),
        board_id: field(doc, &legacy, "board_id"),
        firmware_mfg: field(doc, &legacy, "firmware_mfg"),
        firmware_version: field(doc, &legacy, "firmware_version"),
        api_version: field(doc, &legacy, "api_version"),
        ssid: meshrf.get("ssid").map(as_str).unwrap_or_default(),
        channel: meshrf.get("channel").map(as_str).unwrap_or_default(),
        chanbw: meshrf.get("chanbw").map(as_str).unwrap_or_default(),
        frequency: meshrf.get("freq").map(as_str).unwrap_or_default(),
        tunnel_installed: to_bool_text(tunnels.get("installed")),
        active_tunnel_count: tunnels
            .get("active_tunnel_count")
            .map(as_str)
            .unwrap_or_else(|| "0".to_string()),
        lat,
        lon,
        wifi_mac_address: resolved.wifi_mac.unwrap_or_default(),
        lan_ip: resolved.lan_ip.unwrap_or_default(),
        grid_square: field(doc, &legacy, "grid_square"),
        services: Vec::new(),
        description,
        supernode: to_bool_text(doc.get("mesh_supernode").or_else(|| legacy.get("mesh_supernode"))),
        mesh_gateway: to_bool_text(doc.get("mesh_gateway").or_else(|| legacy.get("mesh_gateway"))),
        meshrf_status: meshrf
            .get("status")
            .map(as_str)
            .unwrap_or_else(|| "on".to_string()),
        link_info: LinkMap::new(),
        hops_away: None,
        last_seen: None,
        antenna_gain: antenna.get("gain").and_then(Value::as_f64),
        beamwidth: antenna.get("beamwidth").and_then(Value::as_f64),
        antenna_builtin: antenna.get("builtin").map(as_str).unwrap_or_default(),
        response_time_ms: 0.0,
    })
}

/// Parse a `services_local` document directly (top-level array), used when
/// the poller fetches it as a standalone endpoint rather than embedded.
pub fn parse_services_local(doc: &Value) -> Vec<ServiceDescriptor> {
    parse_services(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_wlan0_interface_ip() {
        let doc = json!({
            "node": "N0CALL-1",
            "interfaces": [
                {"name": "eth0.3975", "ip": "10.1.1.9"},
                {"name": "wlan0", "ip": "10.1.1.1", "mac": "AA:BB:CC:DD:EE:FF"},
                {"name": "br-lan", "ip": "192.168.1.1"},
            ]
        });
        let rec = parse_sysinfo(&doc, "10.9.9.9").unwrap();
        assert_eq!(rec.wlan_ip, "10.1.1.1");
        assert_eq!(rec.wifi_mac_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(rec.lan_ip, "192.168.1.1");
    }

    #[test]
    fn falls_back_to_caller_ip_when_none_resolve() {
        let doc = json!({"node": "N0CALL-2", "interfaces": []});
        let rec = parse_sysinfo(&doc, "10.2.2.2").unwrap();
        assert_eq!(rec.wlan_ip, "10.2.2.2");
    }

    #[test]
    fn treats_none_ip_as_absent() {
        let doc = json!({
            "interfaces": [
                {"name": "wlan0", "ip": "none"},
                {"name": "br0", "ip": "10.5.5.5"},
            ]
        });
        let rec = parse_sysinfo(&doc, "10.9.9.9").unwrap();
        assert_eq!(rec.wlan_ip, "10.5.5.5");
    }

    #[test]
    fn legacy_node_details_used_when_top_level_absent() {
        let doc = json!({
            "node_details": {"node": "LEGACY-1", "model": "Ubiquiti"},
            "interfaces": [],
        });
        let rec = parse_sysinfo(&doc, "10.1.1.1").unwrap();
        assert_eq!(rec.node, "LEGACY-1");
        assert_eq!(rec.model, "Ubiquiti");
    }

    #[test]
    fn description_br_tags_normalised_to_space() {
        let doc = json!({"description": "Line one<br>Line two<BR/>Line three"});
        let rec = parse_sysinfo(&doc, "10.1.1.1").unwrap();
        assert_eq!(rec.description, "Line one Line two Line three");
    }

    #[test]
    fn missing_coordinates_default_to_zero() {
        let doc = json!({});
        let rec = parse_sysinfo(&doc, "10.1.1.1").unwrap();
        assert_eq!(rec.lat, 0.0);
        assert_eq!(rec.lon, 0.0);
    }

    #[test]
    fn boolean_ish_normalisation() {
        let doc = json!({"mesh_supernode": "1", "mesh_gateway": true});
        let rec = parse_sysinfo(&doc, "10.1.1.1").unwrap();
        assert_eq!(rec.supernode, "true");
        assert_eq!(rec.mesh_gateway, "true");
    }

    #[test]
    fn link_info_normalises_type() {
        let doc = json!({
            "10.1.1.2": {"type": "dtdlink", "rxcost": 12.0},
            "10.1.1.3": {"type": "wireguard"},
        });
        let map = parse_link_info(&doc);
        assert_eq!(map["10.1.1.2"].link_type, Some(LinkType::Dtd));
        assert_eq!(map["10.1.1.3"].link_type, Some(LinkType::Tun));
    }
}
