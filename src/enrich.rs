//! Link-graph enricher.
//!
//! Second pass over persisted nodes: for each node with a non-empty
//! `link_info` and non-zero coordinates, resolves each link's destination
//! coordinates (stored node lat/lon, else the link's own LQM-carried
//! lat/lon, else skip) and computes great-circle distance and initial
//! bearing over the WGS-84 mean sphere (radius 6371 km).

use std::collections::HashMap;

use crate::model::{LinkType, NodeRecord};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_TO_MILES: f64 = 0.621371;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Initial bearing from (lat1, lon1) to (lat2, lon2), normalised to
/// [0, 360) degrees.
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let bearing = y.atan2(x).to_degrees();
    (bearing + 360.0) % 360.0
}

/// Enrich one node's link map in place, given a lookup of already-persisted
/// node coordinates. Returns the number of links that received coordinates
/// (i.e. the node's contribution to `mappableLinks`).
pub fn enrich_node(node: &mut NodeRecord, node_coords: &HashMap<String, (f64, f64)>) -> u32 {
    if node.link_info.is_empty() || !node.has_location() {
        return 0;
    }

    let mut enriched = 0u32;
    for (dest_ip, link) in node.link_info.iter_mut() {
        let endpoint = node_coords
            .get(dest_ip)
            .copied()
            .or(match (link.lat, link.lon) {
                (Some(lat), Some(lon)) => Some((lat, lon)),
                _ => None,
            });

        let Some((dest_lat, dest_lon)) = endpoint else {
            continue;
        };

        link.link_lat = Some(dest_lat);
        link.link_lon = Some(dest_lon);
        enriched += 1;

        if link.link_type == Some(LinkType::Rf) {
            let km = haversine_km(node.lat, node.lon, dest_lat, dest_lon);
            let bearing = initial_bearing_deg(node.lat, node.lon, dest_lat, dest_lon);
            link.distance_km = Some(round_to(km, 2));
            link.distance_miles = Some(round_to(km * KM_TO_MILES, 2));
            link.bearing = Some(round_to(bearing, 1));
        }
    }
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkRecord;

    #[test]
    fn haversine_zero_for_identical_points() {
        assert_eq!(haversine_km(40.0, -105.0, 40.0, -105.0), 0.0);
        assert_eq!(initial_bearing_deg(40.0, -105.0, 40.0, -105.0), 0.0);
    }

    #[test]
    fn haversine_one_degree_longitude_at_equator() {
        let km = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!((km - 111.19).abs() < 0.1, "got {km}");
        let bearing = initial_bearing_deg(0.0, 0.0, 0.0, 1.0);
        assert!((bearing - 90.0).abs() < 0.01, "got {bearing}");
    }

    #[test]
    fn bearing_always_in_range() {
        let bearing = initial_bearing_deg(40.0, -105.0, 39.0, -106.0);
        assert!((0.0..360.0).contains(&bearing));
    }

    #[test]
    fn enrich_skips_links_with_no_endpoint_coordinates() {
        let mut node = NodeRecord {
            lat: 40.0,
            lon: -105.0,
            ..blank_node("10.1.1.1")
        };
        node.link_info.insert(
            "10.1.1.2".to_string(),
            LinkRecord {
                link_type: Some(LinkType::Rf),
                ..Default::default()
            },
        );
        let coords = HashMap::new();
        let count = enrich_node(&mut node, &coords);
        assert_eq!(count, 0);
        assert!(node.link_info["10.1.1.2"].link_lat.is_none());
    }

    #[test]
    fn enrich_fills_distance_and_bearing_for_rf_links() {
        let mut node = NodeRecord {
            lat: 40.0,
            lon: -105.0,
            ..blank_node("10.1.1.1")
        };
        node.link_info.insert(
            "10.1.1.2".to_string(),
            LinkRecord {
                link_type: Some(LinkType::Rf),
                ..Default::default()
            },
        );
        let mut coords = HashMap::new();
        coords.insert("10.1.1.2".to_string(), (40.0, -104.0));
        let count = enrich_node(&mut node, &coords);
        assert_eq!(count, 1);
        let link = &node.link_info["10.1.1.2"];
        assert!((link.distance_km.unwrap() - 85.39).abs() < 0.1);
        assert!((link.bearing.unwrap() - 90.0).abs() < 1.0);
    }

    fn blank_node(ip: &str) -> NodeRecord {
        NodeRecord {
            wlan_ip: ip.to_string(),
            node: String::new(),
            uptime: String::new(),
            loadavg: Default::default(),
            model: String::new(),
            board_id: String::new(),
            firmware_mfg: String::new(),
            firmware_version: String::new(),
            api_version: String::new(),
            ssid: String::new(),
            channel: String::new(),
            chanbw: String::new(),
            frequency: String::new(),
            tunnel_installed: String::new(),
            active_tunnel_count: String::new(),
            lat: 0.0,
            lon: 0.0,
            wifi_mac_address: String::new(),
            lan_ip: String::new(),
            grid_square: String::new(),
            services: Vec::new(),
            description: String::new(),
            supernode: "false".to_string(),
            mesh_gateway: "false".to_string(),
            meshrf_status: "on".to_string(),
            link_info: Default::default(),
            hops_away: Some(1),
            last_seen: None,
            antenna_gain: None,
            beamwidth: None,
            antenna_builtin: String::new(),
            response_time_ms: 0.0,
        }
    }
}
