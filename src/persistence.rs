//! Persistence adapter.
//!
//! Upsert/read over the relational schema. Opaque structured fields
//! (`link_info`, `services`, `loadavg`) are stored as hex-encoded JSON text
//! columns; round-trip must be lossless, and a corrupt blob is treated as
//! empty rather than failing the whole row read.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::error::PollerError;
use crate::model::{CycleStats, LinkMap, LoadAverage, NodeRecord, ServiceDescriptor};

const STATS_ROW_ID: &str = "POLLINFO";

pub struct Persistence {
    pool: Pool<Postgres>,
    node_table: String,
    stats_table: String,
    aredn_table: String,
}

fn encode_blob<T: serde::Serialize>(value: &T) -> String {
    hex::encode(serde_json::to_vec(value).unwrap_or_default())
}

/// Decode a hex-encoded JSON blob, logging and falling back to the
/// `Default` value on any failure (truncated hex, corrupt JSON, or a
/// pre-migration legacy encoding this adapter doesn't understand).
fn decode_blob<T: serde::de::DeserializeOwned + Default>(raw: Option<&str>, field: &str) -> T {
    let Some(raw) = raw else { return T::default() };
    let bytes = match hex::decode(raw) {
        Ok(b) => b,
        Err(e) => {
            warn!("persistence: {field} is not valid hex, treating as empty: {e}");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!("persistence: {field} failed to deserialize, treating as empty: {e}");
            T::default()
        }
    }
}

impl Persistence {
    pub async fn connect(db: &DatabaseConfig) -> Result<Self, PollerError> {
        let url = format!(
            "postgres://{}:{}@{}/{}",
            db.sql_user, db.sql_passwd, db.sql_server, db.sql_db
        );
        let pool = PgPoolOptions::new()
            .min_connections(5)
            .max_connections(20)
            .connect(&url)
            .await?;
        Ok(Self {
            pool,
            node_table: db.sql_db_tbl_node.clone(),
            stats_table: db.sql_db_tbl_map.clone(),
            aredn_table: db.sql_db_tbl_aredn.clone(),
        })
    }

    /// Create the three tables if they don't already exist. Safe to call
    /// on every startup.
    pub async fn ensure_schema(&self) -> Result<(), PollerError> {
        let node_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {nt} (
                wlan_ip TEXT PRIMARY KEY,
                node TEXT,
                uptime TEXT,
                loadavg TEXT,
                model TEXT,
                board_id TEXT,
                firmware_mfg TEXT,
                firmware_version TEXT,
                api_version TEXT,
                ssid TEXT,
                channel TEXT,
                chanbw TEXT,
                frequency TEXT,
                tunnel_installed TEXT,
                active_tunnel_count TEXT,
                lat DOUBLE PRECISION,
                lon DOUBLE PRECISION,
                wifi_mac_address TEXT,
                lan_ip TEXT,
                grid_square TEXT,
                services TEXT,
                description TEXT,
                supernode TEXT,
                mesh_gateway TEXT,
                meshrf_status TEXT,
                link_info TEXT,
                hops_away INTEGER,
                last_seen TIMESTAMPTZ,
                antenna_gain DOUBLE PRECISION,
                beamwidth DOUBLE PRECISION,
                antenna_builtin TEXT,
                response_time_ms DOUBLE PRECISION
            )",
            nt = self.node_table
        );
        sqlx::query(&node_ddl).execute(&self.pool).await?;

        let stats_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {st} (
                id TEXT PRIMARY KEY,
                configured_concurrency INTEGER,
                candidate_count INTEGER,
                count_failed INTEGER,
                max_hops INTEGER,
                count_polled INTEGER,
                count_no_location INTEGER,
                mappable_nodes INTEGER,
                mappable_links INTEGER,
                cycle_duration_secs DOUBLE PRECISION,
                babel_count INTEGER,
                olsr_count INTEGER,
                combo_count INTEGER,
                min_response_time_ms DOUBLE PRECISION,
                max_response_time_ms DOUBLE PRECISION
            )",
            st = self.stats_table
        );
        sqlx::query(&stats_ddl).execute(&self.pool).await?;

        // Created for ecosystem compatibility with the legacy tool suite;
        // this daemon never writes to it itself.
        let aredn_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {at} (
                id SERIAL PRIMARY KEY,
                version_type TEXT,
                version TEXT,
                updated TIMESTAMPTZ
            )",
            at = self.aredn_table
        );
        sqlx::query(&aredn_ddl).execute(&self.pool).await?;

        Ok(())
    }

    /// `--flush`: drop and recreate the node table.
    pub async fn flush(&self) -> Result<(), PollerError> {
        let drop_ddl = format!("DROP TABLE IF EXISTS {}", self.node_table);
        sqlx::query(&drop_ddl).execute(&self.pool).await?;
        self.ensure_schema().await
    }

    /// Idempotent upsert keyed by `wlan_ip`. `last_seen` is always set to
    /// now. `link_info` uses COALESCE semantics: a caller passing an empty
    /// link map (e.g. a partial read that never re-fetched link_info) does
    /// not clobber previously-stored link data.
    pub async fn upsert_node(&self, node: &NodeRecord) -> Result<(), PollerError> {
        let loadavg = encode_blob(&node.loadavg);
        let services = encode_blob(&node.services);
        let link_info_blob = if node.link_info.is_empty() {
            None
        } else {
            Some(encode_blob(&node.link_info))
        };

        let sql = format!(
            "INSERT INTO {nt} (
                wlan_ip, node, uptime, loadavg, model, board_id, firmware_mfg,
                firmware_version, api_version, ssid, channel, chanbw, frequency,
                tunnel_installed, active_tunnel_count, lat, lon, wifi_mac_address,
                lan_ip, grid_square, services, description, supernode, mesh_gateway,
                meshrf_status, link_info, hops_away, last_seen, antenna_gain,
                beamwidth, antenna_builtin, response_time_ms
            ) VALUES (
                $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,
                $19,$20,$21,$22,$23,$24,$25,$26,$27,now(),$28,$29,$30,$31
            )
            ON CONFLICT (wlan_ip) DO UPDATE SET
                node = EXCLUDED.node,
                uptime = EXCLUDED.uptime,
                loadavg = EXCLUDED.loadavg,
                model = EXCLUDED.model,
                board_id = EXCLUDED.board_id,
                firmware_mfg = EXCLUDED.firmware_mfg,
                firmware_version = EXCLUDED.firmware_version,
                api_version = EXCLUDED.api_version,
                ssid = EXCLUDED.ssid,
                channel = EXCLUDED.channel,
                chanbw = EXCLUDED.chanbw,
                frequency = EXCLUDED.frequency,
                tunnel_installed = EXCLUDED.tunnel_installed,
                active_tunnel_count = EXCLUDED.active_tunnel_count,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                wifi_mac_address = EXCLUDED.wifi_mac_address,
                lan_ip = EXCLUDED.lan_ip,
                grid_square = EXCLUDED.grid_square,
                services = EXCLUDED.services,
                description = EXCLUDED.description,
                supernode = EXCLUDED.supernode,
                mesh_gateway = EXCLUDED.mesh_gateway,
                meshrf_status = EXCLUDED.meshrf_status,
                link_info = COALESCE(EXCLUDED.link_info, {nt}.link_info),
                hops_away = EXCLUDED.hops_away,
                last_seen = now(),
                antenna_gain = EXCLUDED.antenna_gain,
                beamwidth = EXCLUDED.beamwidth,
                antenna_builtin = EXCLUDED.antenna_builtin,
                response_time_ms = EXCLUDED.response_time_ms",
            nt = self.node_table
        );

        sqlx::query(&sql)
            .bind(&node.wlan_ip)
            .bind(&node.node)
            .bind(&node.uptime)
            .bind(&loadavg)
            .bind(&node.model)
            .bind(&node.board_id)
            .bind(&node.firmware_mfg)
            .bind(&node.firmware_version)
            .bind(&node.api_version)
            .bind(&node.ssid)
            .bind(&node.channel)
            .bind(&node.chanbw)
            .bind(&node.frequency)
            .bind(&node.tunnel_installed)
            .bind(&node.active_tunnel_count)
            .bind(node.lat)
            .bind(node.lon)
            .bind(&node.wifi_mac_address)
            .bind(&node.lan_ip)
            .bind(&node.grid_square)
            .bind(&services)
            .bind(&node.description)
            .bind(&node.supernode)
            .bind(&node.mesh_gateway)
            .bind(&node.meshrf_status)
            .bind(&link_info_blob)
            .bind(node.hops_away.map(|h| h as i32))
            .bind(node.antenna_gain)
            .bind(node.beamwidth)
            .bind(&node.antenna_builtin)
            .bind(node.response_time_ms)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Rewrite a node's link map wholesale (used by the enricher after it
    /// has recomputed distance/bearing on a copy read from `get_all_nodes`).
    pub async fn update_link_info(&self, ip: &str, links: &LinkMap) -> Result<(), PollerError> {
        let blob = encode_blob(links);
        let sql = format!("UPDATE {} SET link_info = $1 WHERE wlan_ip = $2", self.node_table);
        sqlx::query(&sql).bind(&blob).bind(ip).execute(&self.pool).await?;
        Ok(())
    }

    /// Mark a node as having no known links (empty link map), without
    /// touching any other field.
    pub async fn mark_inactive(&self, ip: &str) -> Result<(), PollerError> {
        self.update_link_info(ip, &LinkMap::new()).await
    }

    pub async fn get_all_nodes(&self) -> Result<Vec<NodeRecord>, PollerError> {
        let sql = format!("SELECT * FROM {}", self.node_table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let loadavg: LoadAverage = decode_blob(row.try_get::<Option<String>, _>("loadavg")?.as_deref(), "loadavg");
            let services: Vec<ServiceDescriptor> =
                decode_blob(row.try_get::<Option<String>, _>("services")?.as_deref(), "services");
            let link_info: LinkMap =
                decode_blob(row.try_get::<Option<String>, _>("link_info")?.as_deref(), "link_info");

            out.push(NodeRecord {
                wlan_ip: row.try_get("wlan_ip")?,
                node: row.try_get::<Option<String>, _>("node")?.unwrap_or_default(),
                uptime: row.try_get::<Option<String>, _>("uptime")?.unwrap_or_default(),
                loadavg,
                model: row.try_get::<Option<String>, _>("model")?.unwrap_or_default(),
                board_id: row.try_get::<Option<String>, _>("board_id")?.unwrap_or_default(),
                firmware_mfg: row.try_get::<Option<String>, _>("firmware_mfg")?.unwrap_or_default(),
                firmware_version: row
                    .try_get::<Option<String>, _>("firmware_version")?
                    .unwrap_or_default(),
                api_version: row.try_get::<Option<String>, _>("api_version")?.unwrap_or_default(),
                ssid: row.try_get::<Option<String>, _>("ssid")?.unwrap_or_default(),
                channel: row.try_get::<Option<String>, _>("channel")?.unwrap_or_default(),
                chanbw: row.try_get::<Option<String>, _>("chanbw")?.unwrap_or_default(),
                frequency: row.try_get::<Option<String>, _>("frequency")?.unwrap_or_default(),
                tunnel_installed: row
                    .try_get::<Option<String>, _>("tunnel_installed")?
                    .unwrap_or_default(),
                active_tunnel_count: row
                    .try_get::<Option<String>, _>("active_tunnel_count")?
                    .unwrap_or_default(),
                lat: row.try_get::<Option<f64>, _>("lat")?.unwrap_or(0.0),
                lon: row.try_get::<Option<f64>, _>("lon")?.unwrap_or(0.0),
                wifi_mac_address: row
                    .try_get::<Option<String>, _>("wifi_mac_address")?
                    .unwrap_or_default(),
                lan_ip: row.try_get::<Option<String>, _>("lan_ip")?.unwrap_or_default(),
                grid_square: row.try_get::<Option<String>, _>("grid_square")?.unwrap_or_default(),
                services,
                description: row.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
                supernode: row.try_get::<Option<String>, _>("supernode")?.unwrap_or_default(),
                mesh_gateway: row.try_get::<Option<String>, _>("mesh_gateway")?.unwrap_or_default(),
                meshrf_status: row
                    .try_get::<Option<String>, _>("meshrf_status")?
                    .unwrap_or_else(|_| "on".to_string()),
                link_info,
                hops_away: row.try_get::<Option<i32>, _>("hops_away")?.map(|h| h as u32),
                last_seen: row.try_get("last_seen")?,
                antenna_gain: row.try_get("antenna_gain")?,
                beamwidth: row.try_get("beamwidth")?,
                antenna_builtin: row
                    .try_get::<Option<String>, _>("antenna_builtin")?
                    .unwrap_or_default(),
                response_time_ms: row.try_get::<Option<f64>, _>("response_time_ms")?.unwrap_or(0.0),
            });
        }
        Ok(out)
    }

    /// Upsert the single stats row on the fixed key `"POLLINFO"`.
    pub async fn save_stats(&self, stats: &CycleStats) -> Result<(), PollerError> {
        let sql = format!(
            "INSERT INTO {st} (
                id, configured_concurrency, candidate_count, count_failed, max_hops,
                count_polled, count_no_location, mappable_nodes, mappable_links,
                cycle_duration_secs, babel_count, olsr_count, combo_count,
                min_response_time_ms, max_response_time_ms
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            ON CONFLICT (id) DO UPDATE SET
                configured_concurrency = EXCLUDED.configured_concurrency,
                candidate_count = EXCLUDED.candidate_count,
                count_failed = EXCLUDED.count_failed,
                max_hops = EXCLUDED.max_hops,
                count_polled = EXCLUDED.count_polled,
                count_no_location = EXCLUDED.count_no_location,
                mappable_nodes = EXCLUDED.mappable_nodes,
                mappable_links = EXCLUDED.mappable_links,
                cycle_duration_secs = EXCLUDED.cycle_duration_secs,
                babel_count = EXCLUDED.babel_count,
                olsr_count = EXCLUDED.olsr_count,
                combo_count = EXCLUDED.combo_count,
                min_response_time_ms = EXCLUDED.min_response_time_ms,
                max_response_time_ms = EXCLUDED.max_response_time_ms",
            st = self.stats_table
        );

        sqlx::query(&sql)
            .bind(STATS_ROW_ID)
            .bind(stats.configured_concurrency as i32)
            .bind(stats.candidate_count as i32)
            .bind(stats.count_failed as i32)
            .bind(stats.max_hops as i32)
            .bind(stats.count_polled as i32)
            .bind(stats.count_no_location as i32)
            .bind(stats.mappable_nodes as i32)
            .bind(stats.mappable_links as i32)
            .bind(stats.cycle_duration_secs)
            .bind(stats.babel_count as i32)
            .bind(stats.olsr_count as i32)
            .bind(stats.combo_count as i32)
            .bind(stats.min_response_time_ms)
            .bind(stats.max_response_time_ms)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Clamp and round a coordinate to 7 fractional digits, rejecting (but not
/// failing on) values outside the valid range. Returns `None` with a
/// warning logged by the caller if out of range — the write still proceeds
/// with the given value, so this is used only to decide whether to warn,
/// not whether to store.
pub fn validate_coordinate(value: f64, min: f64, max: f64) -> Option<f64> {
    let rounded = (value * 1e7).round() / 1e7;
    if (min..=max).contains(&rounded) {
        Some(rounded)
    } else {
        None
    }
}

pub fn round_coordinates(node: &mut NodeRecord) {
    let lat_rounded = (node.lat * 1e7).round() / 1e7;
    let lon_rounded = (node.lon * 1e7).round() / 1e7;
    if validate_coordinate(lat_rounded, -90.0, 90.0).is_none() {
        warn!("persistence: lat {lat_rounded} out of range for {}", node.wlan_ip);
    }
    if validate_coordinate(lon_rounded, -180.0, 180.0).is_none() {
        warn!("persistence: lon {lon_rounded} out of range for {}", node.wlan_ip);
    }
    node.lat = lat_rounded;
    node.lon = lon_rounded;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkRecord, LinkType};
    use std::collections::HashMap;

    #[test]
    fn blob_round_trips_link_map() {
        let mut map: LinkMap = HashMap::new();
        map.insert(
            "10.1.1.2".to_string(),
            LinkRecord {
                link_type: Some(LinkType::Rf),
                rxcost: Some(12.5),
                ..Default::default()
            },
        );
        let encoded = encode_blob(&map);
        let decoded: LinkMap = decode_blob(Some(&encoded), "link_info");
        assert_eq!(decoded["10.1.1.2"].rxcost, Some(12.5));
    }

    #[test]
    fn blob_round_trips_loadavg() {
        let loads = LoadAverage([0.1, 0.2, 0.3]);
        let encoded = encode_blob(&loads);
        let decoded: LoadAverage = decode_blob(Some(&encoded), "loadavg");
        assert_eq!(decoded, loads);
    }

    #[test]
    fn corrupt_blob_decodes_to_default() {
        let decoded: LinkMap = decode_blob(Some("not-hex-at-all-zz"), "link_info");
        assert!(decoded.is_empty());
    }

    #[test]
    fn coordinate_rounding_clamps_to_seven_digits() {
        let mut node = crate::sysinfo::parse_sysinfo(&serde_json::json!({}), "10.1.1.1").unwrap();
        node.lat = 40.123456789;
        node.lon = -105.987654321;
        round_coordinates(&mut node);
        assert_eq!(node.lat, 40.1234568);
        assert_eq!(node.lon, -105.9876543);
    }
}
