//! CVSS scoring and the score-to-severity policy.

use serde::{Deserialize, Serialize};

use crate::model::Severity;

/// CVSS cutoffs and the fallback used when a source gives no score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPolicy {
    /// Lowest score rated MEDIUM.
    pub medium: f32,
    /// Lowest score rated HIGH.
    pub high: f32,
    /// Lowest score rated CRITICAL.
    pub critical: f32,
    /// Severity for OSV advisories that carry neither a score nor a label.
    pub osv_default: Severity,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            medium: 4.0,
            high: 7.0,
            critical: 9.0,
            osv_default: Severity::Medium,
        }
    }
}

impl SeverityPolicy {
    /// Maps a CVSS base score (0.0-10.0) to a severity.
    pub fn from_score(&self, score: f32) -> Severity {
        match score {
            s if s >= self.critical => Severity::Critical,
            s if s >= self.high => Severity::High,
            s if s >= self.medium => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Parses a numeric score or a CVSS v3 vector and rates it.
    ///
    /// Returns the computed score alongside the severity; `None` when the
    /// input is neither.
    pub fn rate(&self, score_or_vector: &str) -> Option<(f32, Severity)> {
        let text = score_or_vector.trim();
        let score = match text.parse::<f32>() {
            Ok(score) if (0.0..=10.0).contains(&score) => score,
            Ok(_) => return None,
            Err(_) => cvss3_base_score(text)?,
        };
        Some((score, self.from_score(score)))
    }
}

/// Computes the CVSS v3.0/v3.1 base score of a vector string such as
/// `CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H`.
///
/// Returns `None` for other CVSS versions or incomplete vectors.
pub fn cvss3_base_score(vector: &str) -> Option<f32> {
    let mut parts = vector.split('/');
    let version = parts.next()?;
    if version != "CVSS:3.1" && version != "CVSS:3.0" {
        return None;
    }

    let mut av = None;
    let mut ac = None;
    let mut pr = None;
    let mut ui = None;
    let mut scope_changed = None;
    let mut c = None;
    let mut i = None;
    let mut a = None;

    for metric in parts {
        let (name, value) = metric.split_once(':')?;
        match name {
            "AV" => av = Some(match value {
                "N" => 0.85,
                "A" => 0.62,
                "L" => 0.55,
                "P" => 0.2,
                _ => return None,
            }),
            "AC" => ac = Some(match value {
                "L" => 0.77,
                "H" => 0.44,
                _ => return None,
            }),
            "PR" => pr = Some(value),
            "UI" => ui = Some(match value {
                "N" => 0.85,
                "R" => 0.62,
                _ => return None,
            }),
            "S" => scope_changed = Some(match value {
                "U" => false,
                "C" => true,
                _ => return None,
            }),
            "C" => c = Some(impact_weight(value)?),
            "I" => i = Some(impact_weight(value)?),
            "A" => a = Some(impact_weight(value)?),
            // temporal and environmental metrics do not affect the base score
            _ => {}
        }
    }

    let scope_changed = scope_changed?;
    let pr = match (pr?, scope_changed) {
        ("N", _) => 0.85,
        ("L", false) => 0.62,
        ("L", true) => 0.68,
        ("H", false) => 0.27,
        ("H", true) => 0.5,
        _ => return None,
    };

    let iss: f64 = 1.0 - (1.0 - c?) * (1.0 - i?) * (1.0 - a?);
    let impact = if scope_changed {
        7.52 * (iss - 0.029) - 3.25 * (iss - 0.02).powi(15)
    } else {
        6.42 * iss
    };
    let exploitability = 8.22 * av? * ac? * pr * ui?;

    if impact <= 0.0 {
        return Some(0.0);
    }

    let raw = if scope_changed {
        (1.08 * (impact + exploitability)).min(10.0)
    } else {
        (impact + exploitability).min(10.0)
    };
    Some(round_up(raw) as f32)
}

fn impact_weight(value: &str) -> Option<f64> {
    match value {
        "H" => Some(0.56),
        "L" => Some(0.22),
        "N" => Some(0.0),
        _ => None,
    }
}

/// Rounds up to one decimal, avoiding floating-point artifacts (CVSS v3.1
/// appendix A).
fn round_up(value: f64) -> f64 {
    let int_input = (value * 100_000.0).round() as i64;
    if int_input % 10_000 == 0 {
        int_input as f64 / 100_000.0
    } else {
        ((int_input / 10_000) + 1) as f64 / 10.0
    }
}
