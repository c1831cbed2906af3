//! Snapshot retention: grouping, filtering and keep/remove decisions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, IsoWeek, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Snapshot;
use crate::error::{Result, VigilError};

/// How many buckets a rule keeps. Serialized as an integer, `-1` meaning
/// unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum KeepCount {
    Unlimited,
    Count(u32),
}

impl KeepCount {
    fn limit(self) -> usize {
        match self {
            KeepCount::Unlimited => usize::MAX,
            KeepCount::Count(n) => n as usize,
        }
    }
}

impl TryFrom<i64> for KeepCount {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(KeepCount::Unlimited),
            n if n < 0 => Err(format!("negative keep count {n} is not allowed (use -1 or 'unlimited')")),
            n => u32::try_from(n)
                .map(KeepCount::Count)
                .map_err(|_| format!("keep count {n} is too large")),
        }
    }
}

impl From<KeepCount> for i64 {
    fn from(value: KeepCount) -> Self {
        match value {
            KeepCount::Unlimited => -1,
            KeepCount::Count(n) => i64::from(n),
        }
    }
}

impl FromStr for KeepCount {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(KeepCount::Unlimited);
        }
        let n: i64 = s
            .parse()
            .map_err(|_| VigilError::InvalidArgument(format!("invalid keep count: '{s}'")))?;
        KeepCount::try_from(n).map_err(VigilError::InvalidArgument)
    }
}

impl fmt::Display for KeepCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepCount::Unlimited => write!(f, "unlimited"),
            KeepCount::Count(n) => write!(f, "{n}"),
        }
    }
}

/// Which bucket rule a stored policy drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionKind {
    Last,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpirePolicy {
    pub last: Option<KeepCount>,
    pub hourly: Option<KeepCount>,
    pub daily: Option<KeepCount>,
    pub weekly: Option<KeepCount>,
    pub monthly: Option<KeepCount>,
    pub yearly: Option<KeepCount>,
    /// Keep everything newer than this.
    pub within: Option<chrono::Duration>,
    /// Keep snapshots carrying any of these tags.
    pub tags: Vec<String>,
}

impl ExpirePolicy {
    pub fn single(kind: RetentionKind, count: KeepCount) -> Self {
        let mut policy = Self::default();
        policy.set(kind, count);
        policy
    }

    pub fn set(&mut self, kind: RetentionKind, count: KeepCount) {
        let slot = match kind {
            RetentionKind::Last => &mut self.last,
            RetentionKind::Hourly => &mut self.hourly,
            RetentionKind::Daily => &mut self.daily,
            RetentionKind::Weekly => &mut self.weekly,
            RetentionKind::Monthly => &mut self.monthly,
            RetentionKind::Yearly => &mut self.yearly,
        };
        *slot = Some(count);
    }

    /// True when no rule is set; such a policy keeps everything.
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
            && self.hourly.is_none()
            && self.daily.is_none()
            && self.weekly.is_none()
            && self.monthly.is_none()
            && self.yearly.is_none()
            && self.within.is_none()
            && self.tags.is_empty()
    }
}

/// Parse a retention window like "2d", "48h", "1w", "6m" or "1y".
/// Pure numeric values are days.
pub fn parse_within(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(VigilError::InvalidArgument("empty duration string".into()));
    }

    if let Ok(n) = s.parse::<i64>() {
        return Ok(chrono::Duration::days(n));
    }

    let (num_str, suffix) = s.split_at(
        s.find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| VigilError::InvalidArgument(format!("invalid duration: '{s}'")))?,
    );
    let n: i64 = num_str
        .parse()
        .map_err(|_| VigilError::InvalidArgument(format!("invalid duration number: '{num_str}'")))?;

    match suffix {
        "h" | "H" => Ok(chrono::Duration::hours(n)),
        "d" | "D" => Ok(chrono::Duration::days(n)),
        "w" | "W" => Ok(chrono::Duration::weeks(n)),
        "m" | "M" => Ok(chrono::Duration::days(n * 30)),
        "y" | "Y" => Ok(chrono::Duration::days(n * 365)),
        _ => Err(VigilError::InvalidArgument(format!(
            "unknown duration suffix: '{suffix}'"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Keep { reasons: Vec<String> },
    Remove,
}

#[derive(Debug, Clone)]
pub struct ExpireEntry {
    pub snapshot: Snapshot,
    pub decision: Decision,
}

impl ExpireEntry {
    pub fn is_kept(&self) -> bool {
        matches!(self.decision, Decision::Keep { .. })
    }
}

type HourlyKey = (i32, u32, u32);
type DailyKey = (i32, u32);
type WeeklyKey = (i32, u32);
type MonthlyKey = (i32, u32);
type YearlyKey = (i32,);

fn hourly_key(t: &DateTime<Utc>) -> HourlyKey {
    (t.year(), t.ordinal(), t.hour())
}

fn daily_key(t: &DateTime<Utc>) -> DailyKey {
    (t.year(), t.ordinal())
}

fn weekly_key(t: &DateTime<Utc>) -> WeeklyKey {
    let iw: IsoWeek = t.iso_week();
    (iw.year(), iw.week())
}

fn monthly_key(t: &DateTime<Utc>) -> MonthlyKey {
    (t.year(), t.month())
}

fn yearly_key(t: &DateTime<Utc>) -> YearlyKey {
    (t.year(),)
}

/// Keep the newest snapshot of each new bucket until `max_buckets` buckets
/// were seen. A snapshot kept by an earlier rule still uses up its bucket.
fn apply_bucket_rule<K: Eq + std::hash::Hash>(
    indices: &[usize],
    times: &[DateTime<Utc>],
    kept: &mut HashSet<usize>,
    reasons: &mut HashMap<usize, Vec<String>>,
    max_buckets: usize,
    key_fn: impl Fn(&DateTime<Utc>) -> K,
    rule_name: &str,
) {
    let mut seen_buckets: HashSet<K> = HashSet::new();
    let mut kept_count = 0usize;

    for &idx in indices {
        if kept_count >= max_buckets {
            break;
        }
        if !seen_buckets.insert(key_fn(&times[idx])) {
            continue;
        }
        kept.insert(idx);
        kept_count += 1;
        reasons
            .entry(idx)
            .or_default()
            .push(format!("{rule_name} #{kept_count}"));
    }
}

/// Decide keep/remove for each snapshot of one group. Returns entries
/// newest first. An empty policy keeps everything.
pub fn apply_policy(snapshots: &[Snapshot], policy: &ExpirePolicy, now: DateTime<Utc>) -> Vec<ExpireEntry> {
    let mut indices: Vec<usize> = (0..snapshots.len()).collect();
    indices.sort_by(|&a, &b| snapshots[b].time.cmp(&snapshots[a].time));

    if policy.is_empty() {
        return indices
            .into_iter()
            .map(|idx| ExpireEntry {
                snapshot: snapshots[idx].clone(),
                decision: Decision::Keep {
                    reasons: vec!["no policy".into()],
                },
            })
            .collect();
    }

    let times: Vec<DateTime<Utc>> = snapshots.iter().map(|s| s.time).collect();
    let mut kept: HashSet<usize> = HashSet::new();
    let mut reasons: HashMap<usize, Vec<String>> = HashMap::new();

    if let Some(within) = policy.within {
        let cutoff = now - within;
        for &idx in &indices {
            if times[idx] >= cutoff {
                kept.insert(idx);
                reasons.entry(idx).or_default().push("within".into());
            }
        }
    }

    if !policy.tags.is_empty() {
        for &idx in &indices {
            if snapshots[idx].tags.iter().any(|t| policy.tags.contains(t)) {
                kept.insert(idx);
                reasons.entry(idx).or_default().push("tag".into());
            }
        }
    }

    if let Some(n) = policy.last {
        for (i, &idx) in indices.iter().take(n.limit()).enumerate() {
            kept.insert(idx);
            reasons
                .entry(idx)
                .or_default()
                .push(format!("last #{}", i + 1));
        }
    }

    if let Some(n) = policy.hourly {
        apply_bucket_rule(&indices, &times, &mut kept, &mut reasons, n.limit(), hourly_key, "hourly");
    }
    if let Some(n) = policy.daily {
        apply_bucket_rule(&indices, &times, &mut kept, &mut reasons, n.limit(), daily_key, "daily");
    }
    if let Some(n) = policy.weekly {
        apply_bucket_rule(&indices, &times, &mut kept, &mut reasons, n.limit(), weekly_key, "weekly");
    }
    if let Some(n) = policy.monthly {
        apply_bucket_rule(&indices, &times, &mut kept, &mut reasons, n.limit(), monthly_key, "monthly");
    }
    if let Some(n) = policy.yearly {
        apply_bucket_rule(&indices, &times, &mut kept, &mut reasons, n.limit(), yearly_key, "yearly");
    }

    indices
        .iter()
        .map(|&idx| {
            let decision = match reasons.remove(&idx) {
                Some(r) => Decision::Keep { reasons: r },
                None => Decision::Remove,
            };
            ExpireEntry {
                snapshot: snapshots[idx].clone(),
                decision,
            }
        })
        .collect()
}

/// Fields snapshots are grouped by before a policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBy {
    pub host: bool,
    pub paths: bool,
    pub tags: bool,
}

impl Default for GroupBy {
    fn default() -> Self {
        Self {
            host: true,
            paths: true,
            tags: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub hostname: Option<String>,
    pub paths: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(h) = &self.hostname {
            parts.push(format!("host [{h}]"));
        }
        if let Some(p) = &self.paths {
            parts.push(format!("paths [{}]", p.join(", ")));
        }
        if let Some(t) = &self.tags {
            parts.push(format!("tags [{}]", t.join(", ")));
        }
        if parts.is_empty() {
            write!(f, "all snapshots")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

pub fn group_snapshots(snapshots: Vec<Snapshot>, by: GroupBy) -> BTreeMap<GroupKey, Vec<Snapshot>> {
    let mut groups: BTreeMap<GroupKey, Vec<Snapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        let key = GroupKey {
            hostname: by.host.then(|| snapshot.hostname.clone()),
            paths: by.paths.then(|| sorted(&snapshot.paths)),
            tags: by.tags.then(|| sorted(&snapshot.tags)),
        };
        groups.entry(key).or_default().push(snapshot);
    }
    groups
}

fn sorted(values: &[String]) -> Vec<String> {
    let mut v = values.to_vec();
    v.sort();
    v
}

/// Selects candidate snapshots. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub hosts: Vec<String>,
    pub paths: Vec<String>,
    pub tags: Vec<String>,
}

impl SnapshotFilter {
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        (self.hosts.is_empty() || self.hosts.contains(&snapshot.hostname))
            && (self.paths.is_empty() || self.paths.iter().all(|p| snapshot.paths.contains(p)))
            && (self.tags.is_empty() || self.tags.iter().any(|t| snapshot.tags.contains(t)))
    }
}
