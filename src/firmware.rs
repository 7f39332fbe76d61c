//! Firmware version classification — pure functions, no I/O.
//!
//! Maps a node's reported firmware version string to a routing-protocol
//! bucket ({Babel, OLSR, Combo, Unknown}) using numeric dotted-quad and
//! nightly-build cutoffs configured per deployment.

use chrono::{DateTime, Utc};

use crate::model::MeshProtocol;

/// Parse a dotted quad `a.b.c.d` (each segment 1-2 digits, trailing segments
/// optional and defaulting to 0) into `a*10^6 + b*10^4 + c*10^2 + d`.
pub fn version_to_order(version: &str) -> Option<i64> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }
    let mut segments = [0i64; 4];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        segments[i] = part.parse().ok()?;
    }
    Some(segments[0] * 1_000_000 + segments[1] * 10_000 + segments[2] * 100 + segments[3])
}

/// True iff `version` is a strict four-segment dotted quad (each segment
/// 1-2 digits). `version_to_order` itself is more lenient — it zero-pads
/// shorter forms so `versionToOrder("3.25.5") == versionToOrder("3.25.5.0")`
/// — but `classify`'s olsr/combo branches must only treat a version as a
/// dotted-quad release when it has all four segments, matching the
/// original classifier's `\d{1,2}\.\d{1,2}\.\d{1,2}\.\d{1,2}` full match.
fn is_full_dotted_quad(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 2 && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse a nightly build identifier `YYYYMMDD-<hex7-8>` into the integer
/// date prefix. The hex suffix is validated but not used in the ordering.
pub fn nightly_to_order(version: &str) -> Option<i64> {
    let (date, hash) = version.split_once('-')?;
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if hash.len() < 7 || hash.len() > 8 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    date.parse().ok()
}

/// Classification kinds recognised by `classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyKind {
    Babel,
    Olsr,
    Combo,
}

/// Evaluate whether `version` matches `kind` given the configured cutoffs.
pub fn classify(
    version: &str,
    kind: ClassifyKind,
    version_cutoff: i64,
    nightly_cutoff: i64,
) -> bool {
    match kind {
        ClassifyKind::Babel => version.starts_with("babel-"),
        ClassifyKind::Olsr => {
            if version.starts_with("babel-") {
                return false;
            }
            if is_full_dotted_quad(version) {
                version_to_order(version).is_some_and(|order| order < version_cutoff)
            } else if let Some(order) = nightly_to_order(version) {
                order < nightly_cutoff
            } else {
                false
            }
        }
        ClassifyKind::Combo => {
            if version.starts_with("babel-") {
                return false;
            }
            if is_full_dotted_quad(version) {
                version_to_order(version).is_some_and(|order| order >= version_cutoff)
            } else if let Some(order) = nightly_to_order(version) {
                order >= nightly_cutoff
            } else {
                false
            }
        }
    }
}

/// Determine the protocol bucket for a node, applying the liveness
/// threshold first: a node not seen within `threshold_seconds` is always
/// `Unknown` regardless of its reported firmware.
pub fn determine_protocol(
    version: &str,
    last_seen: Option<DateTime<Utc>>,
    threshold_seconds: i64,
    version_cutoff: &str,
    nightly_cutoff: &str,
) -> MeshProtocol {
    let stale = match last_seen {
        None => true,
        Some(seen) => (Utc::now() - seen).num_seconds() > threshold_seconds,
    };
    if stale {
        return MeshProtocol::Unknown;
    }

    let version_cutoff_order = version_to_order(version_cutoff).unwrap_or(i64::MAX);
    let nightly_cutoff_order = nightly_to_order(nightly_cutoff).unwrap_or(i64::MAX);

    if classify(version, ClassifyKind::Babel, version_cutoff_order, nightly_cutoff_order) {
        MeshProtocol::Babel
    } else if classify(version, ClassifyKind::Olsr, version_cutoff_order, nightly_cutoff_order) {
        MeshProtocol::Olsr
    } else if classify(version, ClassifyKind::Combo, version_cutoff_order, nightly_cutoff_order) {
        MeshProtocol::Combo
    } else {
        MeshProtocol::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn version_order_basic() {
        assert_eq!(version_to_order("3.25.5.0"), Some(3_250_500));
        assert_eq!(version_to_order("3.25.5"), version_to_order("3.25.5.0"));
        assert_eq!(version_to_order("garbage"), None);
    }

    #[test]
    fn version_order_rejects_overlong_segments() {
        assert_eq!(version_to_order("3.256.5.0"), None);
        assert_eq!(version_to_order("3.25.5.0.1"), None);
    }

    #[test]
    fn nightly_order_basic() {
        assert_eq!(nightly_to_order("20250601-abcdef1"), Some(20_250_601));
        assert_eq!(nightly_to_order("20250601-abcdef12"), Some(20_250_601));
        assert_eq!(nightly_to_order("not-a-nightly"), None);
    }

    #[test]
    fn classify_babel() {
        assert!(classify("babel-20250601-abcdef1", ClassifyKind::Babel, 0, 0));
        assert!(!classify("3.25.5.0", ClassifyKind::Babel, 0, 0));
    }

    #[test]
    fn classify_olsr_and_combo() {
        let cutoff = 3_250_500;
        assert!(!classify("3.25.5.0", ClassifyKind::Olsr, cutoff, i64::MAX));
        assert!(classify("3.25.4.0", ClassifyKind::Olsr, cutoff, i64::MAX));
        assert!(classify("3.25.5.0", ClassifyKind::Combo, cutoff, i64::MAX));
    }

    #[test]
    fn classify_rejects_short_dotted_quad() {
        // "3.25" zero-pads to the same order as "3.25.0.0" under
        // version_to_order, which is below the cutoff, but classify must
        // not treat a partial version as a dotted-quad release at all.
        let cutoff = 3_250_500;
        assert!(!classify("3.25", ClassifyKind::Olsr, cutoff, i64::MAX));
        assert!(!classify("3.25", ClassifyKind::Combo, cutoff, i64::MAX));
    }

    #[test]
    fn determine_protocol_stale_is_unknown() {
        let eight_days_ago = Utc::now() - Duration::days(8);
        let result = determine_protocol(
            "3.25.5.0",
            Some(eight_days_ago),
            7 * 24 * 3600,
            "3.25.5.0",
            "20250507-aaaaaaaa",
        );
        assert_eq!(result, MeshProtocol::Unknown);
    }

    #[test]
    fn determine_protocol_fresh_combo() {
        let result = determine_protocol(
            "3.25.5.0",
            Some(Utc::now()),
            7 * 24 * 3600,
            "3.25.5.0",
            "20250507-aaaaaaaa",
        );
        assert_eq!(result, MeshProtocol::Combo);
    }
}
