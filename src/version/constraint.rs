//! Declared version constraints and affected-range intersection.
//!
//! A declared version is kept exactly as written in the manifest; this module
//! interprets it on demand. Every constraint reduces to a union of half-open
//! or closed [`Interval`]s so it can be compared against the
//! `introduced`/`fixed` ranges the vulnerability sources report.
//!
//! # Supported syntax
//!
//! | Form | Example | Ecosystems |
//! |------|---------|------------|
//! | exact | `1.2.3`, `==1.2.3`, `=1.2.3` | all |
//! | comparators | `>=1.0 <2.0`, `>=1.0,<2.0` | npm, PyPI, Cargo, Composer, RubyGems |
//! | caret / tilde | `^1.2`, `~1.2.3` | npm, Cargo, Composer |
//! | compatible release | `~=1.4`, `~> 2.1` | PyPI, RubyGems |
//! | wildcard | `1.x`, `1.2.*`, `1.+` | npm, PyPI, Gradle |
//! | hyphen | `1.2.3 - 2.0.0` | npm |
//! | interval | `[1.0,2.0)`, `[1.5]` | Maven, NuGet |
//! | union | `^1.0 \|\| ^2.0` | npm, Composer |

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

use super::Version;
use crate::error::VersionError;
use crate::model::{AffectedRange, Ecosystem};

/// One end of an interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    pub fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }
}

/// A contiguous set of versions. `None` bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interval {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Interval {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn exact(version: Version) -> Self {
        Self {
            lower: Some(Bound::inclusive(version.clone())),
            upper: Some(Bound::inclusive(version)),
        }
    }

    pub fn contains(&self, version: &Version) -> bool {
        if let Some(lower) = &self.lower {
            match version.cmp(&lower.version) {
                Ordering::Less => return false,
                Ordering::Equal if !lower.inclusive => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match version.cmp(&upper.version) {
                Ordering::Greater => return false,
                Ordering::Equal if !upper.inclusive => return false,
                _ => {}
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper)) => match lower.version.cmp(&upper.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lower.inclusive && upper.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// Narrows this interval by another one (logical AND).
    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            lower: tighter_lower(self.lower.as_ref(), other.lower.as_ref()),
            upper: tighter_upper(self.upper.as_ref(), other.upper.as_ref()),
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        !self.intersect(other).is_empty()
    }

    fn with_lower(mut self, bound: Bound) -> Self {
        self.lower = tighter_lower(self.lower.as_ref(), Some(&bound));
        self
    }

    fn with_upper(mut self, bound: Bound) -> Self {
        self.upper = tighter_upper(self.upper.as_ref(), Some(&bound));
        self
    }
}

fn tighter_lower(a: Option<&Bound>, b: Option<&Bound>) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => Some(match x.version.cmp(&y.version) {
            Ordering::Greater => x.clone(),
            Ordering::Less => y.clone(),
            Ordering::Equal => Bound {
                version: x.version.clone(),
                inclusive: x.inclusive && y.inclusive,
            },
        }),
    }
}

fn tighter_upper(a: Option<&Bound>, b: Option<&Bound>) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => Some(match x.version.cmp(&y.version) {
            Ordering::Less => x.clone(),
            Ordering::Greater => y.clone(),
            Ordering::Equal => Bound {
                version: x.version.clone(),
                inclusive: x.inclusive && y.inclusive,
            },
        }),
    }
}

/// An interpreted declared version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// A single pinned version.
    Exact(Version),
    /// A union of intervals.
    Range(Vec<Interval>),
    /// No constraint at all (`*`, `latest`, empty).
    Any,
}

impl VersionConstraint {
    /// Interprets a declared version using the conventions of `ecosystem`.
    ///
    /// Returns [`VersionError::AmbiguousVersionRange`] for anything that does
    /// not denote a set of registry versions: git/path/url specs, unresolved
    /// property placeholders, or malformed comparators.
    pub fn parse(ecosystem: Ecosystem, declared: &str) -> Result<Self, VersionError> {
        let declared = declared.trim();
        let ambiguous = || VersionError::AmbiguousVersionRange(declared.to_string());

        if declared.is_empty()
            || matches!(
                declared.to_ascii_lowercase().as_str(),
                "*" | "x" | "latest" | "any" | "+"
            )
        {
            return Ok(Self::Any);
        }

        if declared.contains("${")
            || declared.contains("://")
            || declared.contains(':')
            || declared.starts_with("file")
            || declared.starts_with("git")
            || declared.starts_with("workspace")
        {
            return Err(ambiguous());
        }

        if declared.starts_with('[') || declared.starts_with('(') {
            return parse_interval_notation(declared).ok_or_else(ambiguous);
        }

        let mut intervals = Vec::new();
        for alternative in declared.split("||").flat_map(|a| a.split('|')) {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                continue;
            }
            let interval = parse_alternative(ecosystem, alternative).ok_or_else(ambiguous)?;
            if !interval.is_empty() {
                intervals.push(interval);
            }
        }

        if intervals.is_empty() {
            return Err(ambiguous());
        }

        if intervals.len() == 1 {
            if let (Some(lower), Some(upper)) = (&intervals[0].lower, &intervals[0].upper) {
                if lower.inclusive && upper.inclusive && lower.version == upper.version {
                    return Ok(Self::Exact(lower.version.clone()));
                }
            }
            if intervals[0] == Interval::unbounded() {
                return Ok(Self::Any);
            }
        }

        Ok(Self::Range(intervals))
    }

    /// The pinned version, if the constraint names exactly one.
    pub fn pinned(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) => Some(v),
            _ => None,
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Range(intervals) => intervals.iter().any(|i| i.contains(version)),
            Self::Any => true,
        }
    }

    /// Whether some admitted version is lower than `version`.
    pub fn admits_below(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => v < version,
            Self::Range(intervals) => intervals.iter().any(|i| match &i.lower {
                Some(lower) => &lower.version < version,
                None => true,
            }),
            Self::Any => true,
        }
    }

    fn intervals(&self) -> Vec<Interval> {
        match self {
            Self::Exact(v) => vec![Interval::exact(v.clone())],
            Self::Range(intervals) => intervals.clone(),
            Self::Any => vec![Interval::unbounded()],
        }
    }

    /// Whether any version admitted by this constraint falls in `range`.
    pub fn intersects(&self, range: &AffectedRange) -> bool {
        let affected = affected_interval(range);
        self.intervals().iter().any(|i| i.overlaps(&affected))
    }
}

/// Converts a source-reported range into an interval.
///
/// `introduced: "0"` and unparseable bounds are treated as unbounded so an
/// odd version string never hides a vulnerability.
pub fn affected_interval(range: &AffectedRange) -> Interval {
    let lower = range
        .introduced
        .as_deref()
        .filter(|s| *s != "0")
        .and_then(|s| Version::parse(s).ok())
        .map(Bound::inclusive);

    let upper = match (&range.fixed, &range.last_affected) {
        (Some(fixed), _) => Version::parse(fixed).ok().map(Bound::exclusive),
        (None, Some(last)) => Version::parse(last).ok().map(Bound::inclusive),
        (None, None) => None,
    };

    Interval { lower, upper }
}

fn comparator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(===|==|>=|<=|!=|~=|~>|>|<|=|\^|~)?\s*v?([0-9][0-9A-Za-z.*+\-_]*|[xX*])")
            .expect("comparator regex is valid")
    })
}

fn hyphen_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*v?([0-9][^\s]*)\s+-\s+v?([0-9][^\s]*)\s*$").expect("hyphen regex is valid")
    })
}

fn parse_alternative(ecosystem: Ecosystem, alternative: &str) -> Option<Interval> {
    if let Some(caps) = hyphen_regex().captures(alternative) {
        let lower = Version::parse(&caps[1]).ok()?;
        let upper = Version::parse(&caps[2]).ok()?;
        return Some(Interval {
            lower: Some(Bound::inclusive(lower)),
            upper: Some(Bound::inclusive(upper)),
        });
    }

    let normalized = alternative.replace(',', " ");
    let mut interval = Interval::unbounded();
    let mut consumed = 0;

    for caps in comparator_regex().captures_iter(&normalized) {
        let whole = caps.get(0)?;
        // Reject garbage between comparators.
        if !normalized[consumed..whole.start()].trim().is_empty() {
            return None;
        }
        consumed = whole.end();

        let op = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let text = &caps[2];
        interval = apply_comparator(ecosystem, interval, op, text)?;
    }

    if consumed == 0 || !normalized[consumed..].trim().is_empty() {
        return None;
    }

    Some(interval)
}

fn wildcard_prefix(text: &str) -> Option<Vec<u64>> {
    let mut prefix = Vec::new();
    for part in text.split('.') {
        if matches!(part, "x" | "X" | "*" | "+") {
            return Some(prefix);
        }
        if let Some(number) = part.strip_suffix('+') {
            prefix.push(number.parse().ok()?);
            return Some(prefix);
        }
        prefix.push(part.parse().ok()?);
    }
    None
}

fn bump(prefix: &[u64], idx: usize) -> Version {
    let mut release: Vec<u64> = prefix[..=idx].to_vec();
    release[idx] += 1;
    Version::from_release(release)
}

fn apply_comparator(
    ecosystem: Ecosystem,
    interval: Interval,
    op: &str,
    text: &str,
) -> Option<Interval> {
    // `1.x`, `1.2.*`, `1.+`, `1.2+` and a bare `*`
    let wildcard = if matches!(text, "x" | "X" | "*") {
        Some(Vec::new())
    } else {
        wildcard_prefix(text)
    };
    let (op, version) = match wildcard {
        Some(prefix) if prefix.is_empty() || op == "!=" => return Some(interval),
        Some(prefix) => {
            let lower = Version::from_release(prefix.clone());
            let upper = bump(&prefix, prefix.len() - 1);
            match op {
                "" | "=" | "==" | "===" => {
                    return Some(
                        interval
                            .with_lower(Bound::inclusive(lower))
                            .with_upper(Bound::exclusive(upper)),
                    )
                }
                ">" => return Some(interval.with_lower(Bound::inclusive(upper))),
                "<=" => return Some(interval.with_upper(Bound::exclusive(upper))),
                // `^1.2.x` behaves as `^1.2`
                _ => (op, lower),
            }
        }
        None => {
            let op = if op.is_empty() {
                default_operator(ecosystem)
            } else {
                op
            };
            (op, Version::parse(text).ok()?)
        }
    };

    let next = match op {
        "=" | "==" | "===" => interval
            .with_lower(Bound::inclusive(version.clone()))
            .with_upper(Bound::inclusive(version)),
        ">=" => interval.with_lower(Bound::inclusive(version)),
        ">" => interval.with_lower(Bound::exclusive(version)),
        "<=" => interval.with_upper(Bound::inclusive(version)),
        "<" => interval.with_upper(Bound::exclusive(version)),
        // Exclusions only remove single points; ignoring them widens the set.
        "!=" => interval,
        "^" => {
            let upper = caret_upper(&version);
            interval
                .with_lower(Bound::inclusive(version))
                .with_upper(Bound::exclusive(upper))
        }
        "~" => {
            let upper = tilde_upper(&version);
            interval
                .with_lower(Bound::inclusive(version))
                .with_upper(Bound::exclusive(upper))
        }
        "~=" | "~>" => {
            let upper = compatible_upper(&version);
            interval
                .with_lower(Bound::inclusive(version))
                .with_upper(Bound::exclusive(upper))
        }
        _ => return None,
    };
    Some(next)
}

/// The operator a bare version implies in each ecosystem.
fn default_operator(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::CratesIo => "^",
        Ecosystem::NuGet => ">=",
        _ => "=",
    }
}

fn caret_upper(version: &Version) -> Version {
    let written = version.release().len().max(1);
    let parts: Vec<u64> = (0..written.max(3)).map(|i| version.component(i)).collect();
    let idx = parts[..written]
        .iter()
        .position(|&n| n != 0)
        .unwrap_or(written - 1);
    bump(&parts, idx)
}

fn tilde_upper(version: &Version) -> Version {
    let parts: Vec<u64> = (0..3).map(|i| version.component(i)).collect();
    let idx = if version.release().len() >= 2 { 1 } else { 0 };
    bump(&parts, idx)
}

fn compatible_upper(version: &Version) -> Version {
    let written = version.release().len();
    let parts: Vec<u64> = version.release().to_vec();
    let idx = if written >= 2 { written - 2 } else { 0 };
    bump(&parts, idx)
}

/// Maven / NuGet interval notation: `[1.0,2.0)`, `(,1.0]`, `[1.5]`, and
/// comma-joined unions `[1.0,1.2),[1.3,)`.
fn parse_interval_notation(declared: &str) -> Option<VersionConstraint> {
    let mut intervals = Vec::new();
    let mut rest = declared.trim();

    while !rest.is_empty() {
        let open = rest.chars().next()?;
        if open != '[' && open != '(' {
            return None;
        }
        let close_idx = rest.find([']', ')'])?;
        let close = rest[close_idx..].chars().next()?;
        let body = &rest[1..close_idx];
        rest = rest[close_idx + 1..].trim_start_matches(',').trim();

        match body.split_once(',') {
            None => {
                let v = Version::parse(body).ok()?;
                intervals.push(Interval::exact(v));
            }
            Some((lo, hi)) => {
                let lower = match lo.trim() {
                    "" => None,
                    s => Some(Bound {
                        version: Version::parse(s).ok()?,
                        inclusive: open == '[',
                    }),
                };
                let upper = match hi.trim() {
                    "" => None,
                    s => Some(Bound {
                        version: Version::parse(s).ok()?,
                        inclusive: close == ']',
                    }),
                };
                intervals.push(Interval { lower, upper });
            }
        }
    }

    match intervals.as_slice() {
        [] => None,
        [single] if single.lower.is_some() && single.lower == single.upper => {
            single.lower.as_ref().map(|b| VersionConstraint::Exact(b.version.clone()))
        }
        _ => Some(VersionConstraint::Range(intervals)),
    }
}
