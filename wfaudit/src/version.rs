use chrono::{DateTime, Duration, Utc};

/// Outcome of comparing two dotted version strings.
///
/// `Incomparable` means at least one side has a non-numeric component;
/// callers must treat it as "do not flag" rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrder {
    Less,
    Equal,
    Greater,
    Incomparable,
}

/// Compare dotted numeric version strings, tolerating a leading `v` and
/// missing trailing components (`v3` orders equal to `v3.0.0`).
pub fn compare_versions(a: &str, b: &str) -> VersionOrder {
    let (Some(a), Some(b)) = (parse_components(a), parse_components(b)) else {
        return VersionOrder::Incomparable;
    };

    let len = a.len().max(b.len());
    for i in 0..len {
        // A missing component compares as zero.
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x < y {
            return VersionOrder::Less;
        }
        if x > y {
            return VersionOrder::Greater;
        }
    }
    VersionOrder::Equal
}

/// The leading numeric major component, if the string parses as a version.
pub fn major_component(version: &str) -> Option<u64> {
    parse_components(version).and_then(|c| c.first().copied())
}

fn parse_components(version: &str) -> Option<Vec<u64>> {
    let trimmed = version.trim().strip_prefix('v').unwrap_or_else(|| version.trim());
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Staleness judgement for hash-pinned references, where no semantic
/// version exists: the candidate is stale when it is older than
/// `reference - threshold`.
pub fn is_stale_by_date(
    candidate: DateTime<Utc>,
    reference: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    reference - candidate > threshold
}
