//! Artifact emitter.
//!
//! Produces `map_data.json` and `node_report_data.json` in the configured
//! data directory: UTF-8, pretty-printed with 2-space indent.

use std::path::Path;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::MapConfig;
use crate::model::{Band, CycleStats, NodeRecord};
use crate::poller::BOARD_IDS_900MHZ;

/// Bucket thresholds used only for artifact grouping. Distinct from
/// `poller::check_band`'s per-node decoration rule: this one uses
/// contiguous channel ranges (and a raw-frequency `>= 3000` catch-all)
/// rather than the enumerated discrete 5GHz channel set.
fn numeric_band_bucket(channel: &str) -> Band {
    let Ok(chan) = channel.trim().parse::<i64>() else {
        return Band::NoRf;
    };
    if chan <= 11 {
        Band::Band2Ghz
    } else if (76..=99).contains(&chan) {
        Band::Band3Ghz
    } else if (37..=64).contains(&chan) || (100..=184).contains(&chan) || chan >= 3000 {
        Band::Band5Ghz
    } else {
        Band::NoRf
    }
}

/// Decide a node's band bucket. Supernode wins over everything; mesh-RF off
/// or channel "none" is `noRF`; then 900MHz board ids; then numeric channel
/// thresholds.
pub fn bucket_for(node: &NodeRecord) -> Band {
    if node.supernode == "true" {
        return Band::Supernode;
    }
    if node.meshrf_status == "off" || node.channel == "none" {
        return Band::NoRf;
    }
    if BOARD_IDS_900MHZ.contains(&node.board_id.to_ascii_lowercase().as_str()) {
        return Band::Band900;
    }
    numeric_band_bucket(&node.channel)
}

#[derive(Serialize)]
struct MapInfo<'a> {
    browser_title: &'a str,
    attribution: &'a str,
    map_contact: &'a str,
    center_lat: f64,
    center_lon: f64,
    initial_zoom_level: u32,
    distance_units: &'a str,
    tile_server_priority: &'a [String],
    inet_tile_servers: &'a [String],
    aredn_tile_servers: &'a [String],
    default_tile_server: &'a str,
}

fn write_pretty_json(path: &Path, value: &serde_json::Value) -> std::io::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)
}

/// Emit both artifacts into `data_dir`. `stats` must already reflect the
/// protocol counts for this cycle; the stats row itself is written only
/// after this call returns.
pub fn emit(
    data_dir: &Path,
    map_config: &MapConfig,
    stats: &CycleStats,
    nodes: &[NodeRecord],
) -> std::io::Result<()> {
    let mut buckets: std::collections::HashMap<&'static str, Vec<&NodeRecord>> =
        std::collections::HashMap::new();
    for node in nodes {
        buckets.entry(bucket_for(node).artifact_key()).or_default().push(node);
    }

    let map_info = MapInfo {
        browser_title: &map_config.browser_title,
        attribution: &map_config.attribution,
        map_contact: &map_config.map_contact,
        center_lat: map_config.center_lat,
        center_lon: map_config.center_lon,
        initial_zoom_level: map_config.initial_zoom_level,
        distance_units: &map_config.distance_units,
        tile_server_priority: &map_config.tile_server_priority,
        inet_tile_servers: &map_config.inet_tile_servers,
        aredn_tile_servers: &map_config.aredn_tile_servers,
        default_tile_server: &map_config.default_tile_server,
    };

    let all_devices = json!({
        "noRF": buckets.get("noRF").cloned().unwrap_or_default(),
        "supernode": buckets.get("supernode").cloned().unwrap_or_default(),
        "900": buckets.get("900").cloned().unwrap_or_default(),
        "2ghz": buckets.get("2ghz").cloned().unwrap_or_default(),
        "3ghz": buckets.get("3ghz").cloned().unwrap_or_default(),
        "5ghz": buckets.get("5ghz").cloned().unwrap_or_default(),
    });

    let map_data = json!({
        "mapInfo": map_info,
        "pollingInfo": stats,
        "allDevices": all_devices,
    });

    write_pretty_json(&data_dir.join("map_data.json"), &map_data)?;

    let report = serde_json::to_value(nodes).unwrap_or(json!([]));
    write_pretty_json(&data_dir.join("node_report_data.json"), &report)?;

    info!(
        "artifacts: wrote map_data.json and node_report_data.json for {} nodes",
        nodes.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(supernode: &str, meshrf: &str, channel: &str, board_id: &str) -> NodeRecord {
        let mut n = crate::sysinfo::parse_sysinfo(&serde_json::json!({}), "10.1.1.1").unwrap();
        n.supernode = supernode.to_string();
        n.meshrf_status = meshrf.to_string();
        n.channel = channel.to_string();
        n.board_id = board_id.to_string();
        n
    }

    #[test]
    fn supernode_wins_over_band() {
        let n = node("true", "on", "149", "");
        assert_eq!(bucket_for(&n), Band::Supernode);
    }

    #[test]
    fn mesh_rf_off_is_no_rf() {
        let n = node("false", "off", "6", "");
        assert_eq!(bucket_for(&n), Band::NoRf);
    }

    #[test]
    fn channel_none_is_no_rf() {
        let n = node("false", "on", "none", "");
        assert_eq!(bucket_for(&n), Band::NoRf);
    }

    #[test]
    fn numeric_channel_buckets() {
        assert_eq!(bucket_for(&node("false", "on", "6", "")), Band::Band2Ghz);
        assert_eq!(bucket_for(&node("false", "on", "80", "")), Band::Band3Ghz);
        assert_eq!(bucket_for(&node("false", "on", "149", "")), Band::Band5Ghz);
    }

    #[test]
    fn zero_channel_is_2ghz() {
        assert_eq!(bucket_for(&node("false", "on", "0", "")), Band::Band2Ghz);
    }

    #[test]
    fn contiguous_5ghz_range_not_just_enumerated_channels() {
        assert_eq!(bucket_for(&node("false", "on", "38", "")), Band::Band5Ghz);
        assert_eq!(bucket_for(&node("false", "on", "41", "")), Band::Band5Ghz);
    }

    #[test]
    fn raw_frequency_channel_is_5ghz() {
        assert_eq!(bucket_for(&node("false", "on", "3000", "")), Band::Band5Ghz);
    }

    #[test]
    fn board_900mhz_wins_over_numeric_channel() {
        assert_eq!(
            bucket_for(&node("false", "on", "149", "0xe009")),
            Band::Band900
        );
    }
}
