//! Configuration loader.
//!
//! Reads an INI file with a single `[user-settings]` section. All values
//! accept surrounding quotes, stripped here. Missing required keys are a
//! fatal `PollerError::Config` at startup; optional keys fall back to the
//! documented defaults.

use ini::Ini;

use crate::error::PollerError;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub sql_server: String,
    pub sql_user: String,
    pub sql_passwd: String,
    pub sql_db: String,
    pub sql_db_tbl_node: String,
    pub sql_db_tbl_map: String,
    pub sql_db_tbl_aredn: String,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub nodelist_node: String,
    pub num_parallel_threads: u32,
    pub poller_cycle_time_minutes: f64,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub protocol_threshold_seconds: i64,
    pub protocol_version_cutoff: String,
    pub protocol_nightly_cutoff: String,
}

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub browser_title: String,
    pub attribution: String,
    pub map_contact: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub initial_zoom_level: u32,
    pub distance_units: String,
    pub tile_server_priority: Vec<String>,
    /// Tile URL templates to use from an Internet-connected browser.
    pub inet_tile_servers: Vec<String>,
    /// Tile URL templates to use from inside the mesh.
    pub aredn_tile_servers: Vec<String>,
    /// Falls back to `mapTileServers[...]` when neither of the above is set.
    pub default_tile_server: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub polling: PollingConfig,
    pub classifier: ClassifierConfig,
    pub map: MapConfig,
    pub webpage_data_dir: String,
}

fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    stripped.unwrap_or(trimmed).to_string()
}

/// Parse `tileServerPriority`, documented as a JSON-or-Python-style list:
/// try JSON array first, else fall back to a comma-separated,
/// bracket-stripped list of quoted/bare tokens.
fn parse_tile_server_priority(raw: &str) -> Vec<String> {
    let raw = strip_quotes(raw);
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(&raw) {
        return items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
    }
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(strip_quotes)
        .collect()
}

/// Collect `prefix[0]`, `prefix[1]`, ... values in index order. The AREDN
/// config convention indexes a repeated setting this way instead of a JSON
/// array, since the file is hand-edited by node operators.
fn indexed_list(section: &Option<&ini::Properties>, prefix: &str) -> Vec<String> {
    let Some(props) = section else { return Vec::new() };
    let mut entries: Vec<(u32, String)> = props
        .iter()
        .filter_map(|(k, v)| {
            let idx_str = k.strip_prefix(prefix)?.strip_prefix('[')?.strip_suffix(']')?;
            let idx: u32 = idx_str.parse().ok()?;
            Some((idx, strip_quotes(v)))
        })
        .collect();
    entries.sort_by_key(|(idx, _)| *idx);
    entries.into_iter().map(|(_, v)| v).collect()
}

struct Section<'a>(Option<&'a ini::Properties>);

impl<'a> Section<'a> {
    fn required(&self, key: &str) -> Result<String, PollerError> {
        self.0
            .and_then(|s| s.get(key))
            .map(strip_quotes)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PollerError::Config(format!("missing required key: {key}")))
    }

    fn optional(&self, key: &str, default: &str) -> String {
        self.0
            .and_then(|s| s.get(key))
            .map(strip_quotes)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn optional_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.0
            .and_then(|s| s.get(key))
            .map(strip_quotes)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// Load settings from an INI file at `path`.
pub fn load(path: &std::path::Path) -> Result<Settings, PollerError> {
    let ini = Ini::load_from_file(path)
        .map_err(|e| PollerError::Config(format!("cannot read {}: {e}", path.display())))?;
    let section = Section(ini.section(Some("user-settings")));

    let database = DatabaseConfig {
        sql_server: section.required("sql_server")?,
        sql_user: section.required("sql_user")?,
        sql_passwd: section.optional("sql_passwd", ""),
        sql_db: section.required("sql_db")?,
        sql_db_tbl_node: section.optional("sql_db_tbl_node", "nodes"),
        sql_db_tbl_map: section.optional("sql_db_tbl_map", "stats"),
        sql_db_tbl_aredn: section.optional("sql_db_tbl_aredn", "aredn_info"),
    };

    let polling = PollingConfig {
        nodelist_node: section.required("nodelistNode")?,
        num_parallel_threads: section.optional_parsed("numParallelThreads", 60),
        poller_cycle_time_minutes: section.optional_parsed("pollerCycleTime", 30.0),
    };

    let classifier = ClassifierConfig {
        protocol_threshold_seconds: section.optional_parsed("protocol_threshold_seconds", 604_800),
        protocol_version_cutoff: section.optional("protocol_version_cutoff", "3.25.5.0"),
        protocol_nightly_cutoff: section.optional("protocol_nightly_cutoff", "20250507-aaaaaaaa"),
    };

    let legacy_tile_servers = indexed_list(&section.0, "mapTileServers");
    let inet_tile_servers = indexed_list(&section.0, "inetTileServer");
    let aredn_tile_servers = indexed_list(&section.0, "arednTileServer");

    let map = MapConfig {
        browser_title: section.optional("map_browserTitle", "AREDN Mesh Map"),
        attribution: section.optional("attribution", ""),
        map_contact: section.optional("mapContact", ""),
        center_lat: section.optional_parsed("map_center_coordinates['lat']", 0.0),
        center_lon: section.optional_parsed("map_center_coordinates['lon']", 0.0),
        initial_zoom_level: section.optional_parsed("map_initial_zoom_level", 10),
        distance_units: section.optional("distanceUnits", "miles"),
        tile_server_priority: parse_tile_server_priority(
            &section.optional("tileServerPriority", "[]"),
        ),
        inet_tile_servers: if inet_tile_servers.is_empty() {
            legacy_tile_servers.clone()
        } else {
            inet_tile_servers
        },
        aredn_tile_servers: if aredn_tile_servers.is_empty() {
            legacy_tile_servers
        } else {
            aredn_tile_servers
        },
        default_tile_server: section.optional("DefaultTileServer", ""),
    };

    let webpage_data_dir = section.optional("webpageDataDir", ".");

    Ok(Settings {
        database,
        polling,
        classifier,
        map,
        webpage_data_dir,
    })
}

/// Cycle window in seconds, never less than 1.
pub fn cycle_seconds(minutes: f64) -> f64 {
    (minutes * 60.0).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_surrounding_quotes() {
        assert_eq!(strip_quotes("\"hello\""), "hello");
        assert_eq!(strip_quotes("'hello'"), "hello");
        assert_eq!(strip_quotes("hello"), "hello");
    }

    #[test]
    fn tile_server_priority_json_array() {
        let parsed = parse_tile_server_priority("[\"inet\", \"aredn\"]");
        assert_eq!(parsed, vec!["inet".to_string(), "aredn".to_string()]);
    }

    #[test]
    fn tile_server_priority_python_style_list() {
        let parsed = parse_tile_server_priority("['inet', 'aredn']");
        assert_eq!(parsed, vec!["inet".to_string(), "aredn".to_string()]);
    }

    #[test]
    fn cycle_seconds_has_a_floor_of_one() {
        assert_eq!(cycle_seconds(0.0), 1.0);
        assert_eq!(cycle_seconds(30.0), 1800.0);
    }

    #[test]
    fn indexed_list_orders_by_index_not_insertion() {
        let ini = Ini::load_from_str(
            "[user-settings]\ninetTileServer[1] = \"b\"\ninetTileServer[0] = \"a\"\n",
        )
        .unwrap();
        let section = ini.section(Some("user-settings"));
        assert_eq!(indexed_list(&section, "inetTileServer"), vec!["a", "b"]);
    }

    #[test]
    fn indexed_list_missing_key_is_empty() {
        let ini = Ini::load_from_str("[user-settings]\nsql_server = x\n").unwrap();
        let section = ini.section(Some("user-settings"));
        assert!(indexed_list(&section, "arednTileServer").is_empty());
    }
}
