use std::time::Duration;

pub(super) fn default_data_dir() -> String {
    "/var/lib/vigil".to_string()
}

pub(super) fn default_refresh_interval() -> String {
    "5m".to_string()
}

pub(super) fn default_backup_guard_ttl() -> String {
    "24h".to_string()
}

pub(super) fn default_tick() -> String {
    "1s".to_string()
}

pub(super) fn default_min_update_pause() -> String {
    "1s".to_string()
}

pub(super) fn default_max_recorded_errors() -> usize {
    20
}

pub(super) fn default_max_log_errors() -> usize {
    10
}

pub(super) fn default_delete_workers() -> usize {
    8
}

pub(super) fn default_prune_max_unused() -> String {
    "5%".to_string()
}

pub(super) fn default_check_workers() -> usize {
    4
}

pub(super) fn default_stats_ttl() -> String {
    "24h".to_string()
}

pub(super) fn default_reconcile_every() -> String {
    "1m".to_string()
}

pub(super) fn default_policies_every() -> String {
    "24h".to_string()
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_engine() -> String {
    "memory".to_string()
}

/// Parse a simple duration string like "500ms", "30s", "5m", "4h" or "2d".
/// A bare number is taken as seconds. Zero is accepted: callers decide what
/// a zero interval means.
pub fn parse_human_duration(raw: &str) -> crate::error::Result<Duration> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(crate::error::VigilError::Config(
            "duration must not be empty".into(),
        ));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (num_part, unit) = input.split_at(split);

    let value: u64 = num_part
        .parse()
        .map_err(|_| crate::error::VigilError::Config(format!("invalid duration value: '{raw}'")))?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "" | "s" | "S" => Duration::from_secs(value),
        "m" | "M" => Duration::from_secs(value.saturating_mul(60)),
        "h" | "H" => Duration::from_secs(value.saturating_mul(60 * 60)),
        "d" | "D" => Duration::from_secs(value.saturating_mul(60 * 60 * 24)),
        other => {
            return Err(crate::error::VigilError::Config(format!(
                "unsupported duration suffix '{other}' in '{raw}' (use ms/s/m/h/d)"
            )));
        }
    };

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_human_duration_units() {
        assert_eq!(parse_human_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_human_duration("30s").unwrap().as_secs(), 30);
        assert_eq!(parse_human_duration("5m").unwrap().as_secs(), 5 * 60);
        assert_eq!(parse_human_duration("24h").unwrap().as_secs(), 24 * 60 * 60);
        assert_eq!(parse_human_duration("2d").unwrap().as_secs(), 2 * 24 * 60 * 60);
        assert_eq!(parse_human_duration("90").unwrap().as_secs(), 90);
        assert_eq!(parse_human_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_human_duration_rejects_garbage() {
        assert!(parse_human_duration("").is_err());
        assert!(parse_human_duration("h").is_err());
        assert!(parse_human_duration("5w").is_err());
        assert!(parse_human_duration("-5m").is_err());
    }
}
