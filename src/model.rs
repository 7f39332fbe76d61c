//! Canonical data model: `NodeRecord`, `LinkRecord`, `CycleStats`, and the
//! small enums that cross the persistence / artifact boundary as text.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emits `last_seen` as `YYYY-MM-DDThh:mm:ssZ` (no fractional seconds),
/// matching the downstream map renderer's expected timestamp format rather
/// than chrono's default RFC 3339 output.
mod last_seen_format {
    use super::{DateTime, Utc};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => NaiveDateTime::parse_from_str(&s, FORMAT)
                .map(|naive| Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Link type as normalised by the topology discoverer / node poller.
/// Serialises to the exact uppercase tokens the persisted schema and
/// emitted artifacts expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    #[serde(rename = "RF")]
    Rf,
    #[serde(rename = "DTD")]
    Dtd,
    #[serde(rename = "TUN")]
    Tun,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl LinkType {
    /// Normalise an LQM/link_info `type` field:
    /// {wireguard,tunnel,tun} -> TUN; {dtd,dtdlink} -> DTD; rf -> RF;
    /// anything else falls back to Unknown.
    pub fn normalise(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "wireguard" | "tunnel" | "tun" => LinkType::Tun,
            "dtd" | "dtdlink" => LinkType::Dtd,
            "rf" => LinkType::Rf,
            _ => LinkType::Unknown,
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkType::Rf => "RF",
            LinkType::Dtd => "DTD",
            LinkType::Tun => "TUN",
            LinkType::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LinkType {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "RF" => LinkType::Rf,
            "DTD" => LinkType::Dtd,
            "TUN" => LinkType::Tun,
            _ => LinkType::Unknown,
        })
    }
}

/// Routing protocol classification, see `firmware.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshProtocol {
    Babel,
    Olsr,
    Combo,
    Unknown,
}

impl std::fmt::Display for MeshProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeshProtocol::Babel => "Babel",
            MeshProtocol::Olsr => "OLSR",
            MeshProtocol::Combo => "Combo",
            MeshProtocol::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Band bucket used by the artifact emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    NoRf,
    Supernode,
    #[serde(rename = "900")]
    Band900,
    #[serde(rename = "2ghz")]
    Band2Ghz,
    #[serde(rename = "3ghz")]
    Band3Ghz,
    #[serde(rename = "5ghz")]
    Band5Ghz,
}

impl Band {
    pub fn artifact_key(self) -> &'static str {
        match self {
            Band::NoRf => "noRF",
            Band::Supernode => "supernode",
            Band::Band900 => "900",
            Band::Band2Ghz => "2ghz",
            Band::Band3Ghz => "3ghz",
            Band::Band5Ghz => "5ghz",
        }
    }
}

/// One entry in a node's advertised `services_local` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Three-sample load average, persisted as an opaque blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LoadAverage(pub [f64; 3]);

/// One link-graph edge, keyed by destination IP in `NodeRecord::link_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LinkRecord {
    pub link_type: Option<LinkType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub olsr_if: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxcost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txcost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Coordinates carried from LQM/link_info directly (coordinate fallback).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    /// Filled in by the enricher. Emitted in the downstream map renderer's
    /// expected camelCase, unlike the rest of this struct's snake_case
    /// fields (which mirror the sysinfo document's own naming).
    #[serde(rename = "linkLat", skip_serializing_if = "Option::is_none")]
    pub link_lat: Option<f64>,
    #[serde(rename = "linkLon", skip_serializing_if = "Option::is_none")]
    pub link_lon: Option<f64>,
    #[serde(rename = "distanceKM", skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(rename = "distanceMiles", skip_serializing_if = "Option::is_none")]
    pub distance_miles: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
}

pub type LinkMap = HashMap<String, LinkRecord>;

/// Canonical per-node state, keyed by `wlan_ip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub wlan_ip: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub uptime: String,
    #[serde(default)]
    pub loadavg: LoadAverage,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub board_id: String,
    #[serde(default)]
    pub firmware_mfg: String,
    #[serde(default)]
    pub firmware_version: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub chanbw: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub tunnel_installed: String,
    #[serde(default)]
    pub active_tunnel_count: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub wifi_mac_address: String,
    #[serde(default)]
    pub lan_ip: String,
    #[serde(default)]
    pub grid_square: String,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub supernode: String,
    #[serde(default)]
    pub mesh_gateway: String,
    #[serde(default)]
    pub meshrf_status: String,
    #[serde(default)]
    pub link_info: LinkMap,
    pub hops_away: Option<u32>,
    #[serde(default, with = "last_seen_format")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub antenna_gain: Option<f64>,
    #[serde(default)]
    pub beamwidth: Option<f64>,
    #[serde(default)]
    pub antenna_builtin: String,
    #[serde(default)]
    pub response_time_ms: f64,
}

impl NodeRecord {
    /// A record is counted as "no location" once persisted, but this is a
    /// view computed on read — coordinates are always stored as given, even
    /// when zero or out of the valid range.
    pub fn has_location(&self) -> bool {
        self.lat != 0.0 || self.lon != 0.0
    }
}

/// Single-row aggregate, overwritten each cycle. Identifier is the fixed
/// constant `"POLLINFO"` at the persistence layer (see `persistence.rs`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CycleStats {
    pub configured_concurrency: u32,
    pub candidate_count: u32,
    pub count_failed: u32,
    pub max_hops: u32,
    pub count_polled: u32,
    pub count_no_location: u32,
    pub mappable_nodes: u32,
    pub mappable_links: u32,
    pub cycle_duration_secs: f64,
    pub babel_count: u32,
    pub olsr_count: u32,
    pub combo_count: u32,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
}
