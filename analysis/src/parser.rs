//! Instrument result files.
//!
//! A result file is a JSON document with run metadata and one entry per
//! sample. Each entry carries the sample's QC finding and its allele calls:
//!
//! ```json
//! {
//!   "kit": "Identifiler Plus",
//!   "case_number": "CASE-2026-001",
//!   "samples": [
//!     { "sample_name": "IDENTIFILER_CHILD_001", "loci": { "D8S1179": ["12", "13"] } }
//!   ]
//! }
//! ```
//!
//! Only `samples[].sample_name` is required. Roles come from an explicit
//! `role` field or, failing that, from the sample name.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strlab_types::{SampleRole, UnknownRole};
use thiserror::Error;

use crate::profile::{AllelePair, InvalidAllele, StrProfile};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed result file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("result file lists no samples")]
    NoSamples,
    #[error("result file has no {0} sample")]
    MissingRole(SampleRole),
    #[error("sample {sample}: invalid allele call at {locus}: {source}")]
    InvalidAllele {
        sample: String,
        locus: String,
        #[source]
        source: InvalidAllele,
    },
    #[error("sample {sample}: {source}")]
    InvalidRole {
        sample: String,
        #[source]
        source: UnknownRole,
    },
    #[error("sample {sample}: locus {locus} is listed more than once")]
    DuplicateLocus { sample: String, locus: String },
    #[error("sample {sample}: unknown finding status {value:?}")]
    InvalidStatus { sample: String, value: String },
    #[error("sample {sample}: confidence {value} is outside 0..=1")]
    InvalidConfidence { sample: String, value: f64 },
    #[error("invalid run date {0:?}")]
    InvalidRunDate(String),
}

// ── Wire format ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawResultFile {
    kit: Option<String>,
    instrument: Option<String>,
    run_date: Option<String>,
    case_number: Option<String>,
    #[serde(default)]
    samples: Vec<RawSample>,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    sample_name: String,
    lab_number: Option<String>,
    role: Option<String>,
    status: Option<String>,
    confidence: Option<f64>,
    loci_detected: Option<u32>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    loci: BTreeMap<String, RawCalls>,
}

/// `["12", "13"]` or `"12,13"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCalls {
    List(Vec<String>),
    Joined(String),
}

impl RawCalls {
    fn into_calls(self) -> Vec<String> {
        match self {
            Self::List(calls) => calls,
            Self::Joined(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

// ── Parsed result ────────────────────────────────────────────

/// QC verdict the analysis software attached to a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    #[default]
    Pass,
    Review,
    Fail,
}

impl FindingStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Review => "review",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" | "ok" => Ok(Self::Pass),
            "review" | "check" => Ok(Self::Review),
            "fail" | "failed" => Ok(Self::Fail),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub kit: Option<String>,
    pub instrument: Option<String>,
    pub run_date: Option<DateTime<Utc>>,
    pub case_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFinding {
    pub sample_name: String,
    pub lab_number: Option<String>,
    pub role: SampleRole,
    pub status: FindingStatus,
    pub confidence: Option<f64>,
    pub loci_detected: u32,
    pub issues: Vec<String>,
    pub profile: StrProfile,
}

/// The samples a paternity comparison needs.
#[derive(Debug, Clone, Copy)]
pub struct Trio<'a> {
    pub child: &'a SampleFinding,
    pub alleged_father: &'a SampleFinding,
    pub mother: Option<&'a SampleFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub metadata: RunMetadata,
    pub samples: Vec<SampleFinding>,
}

impl AnalysisResult {
    /// First child, alleged father and mother in file order.
    pub fn trio(&self) -> Result<Trio<'_>, ParseError> {
        let first = |role| self.samples.iter().find(|s| s.role == role);
        Ok(Trio {
            child: first(SampleRole::Child).ok_or(ParseError::MissingRole(SampleRole::Child))?,
            alleged_father: first(SampleRole::AllegedFather)
                .ok_or(ParseError::MissingRole(SampleRole::AllegedFather))?,
            mother: first(SampleRole::Mother),
        })
    }

    #[must_use]
    pub fn count_role(&self, role: SampleRole) -> usize {
        self.samples.iter().filter(|s| s.role == role).count()
    }
}

/// Guess a role from a sample name such as `IDENTIFILER_CHILD_001` or `CASE12-AF2`.
#[must_use]
pub fn infer_role(sample_name: &str) -> SampleRole {
    let upper = sample_name.to_ascii_uppercase();
    let is_af_token = upper
        .split(['_', '-', ' ', '.'])
        .map(|token| token.trim_end_matches(|c: char| c.is_ascii_digit()))
        .any(|token| token == "AF" || token == "ALLEGED");

    if upper.contains("CHILD") {
        SampleRole::Child
    } else if is_af_token || upper.contains("FATHER") {
        SampleRole::AllegedFather
    } else if upper.contains("MOTHER") {
        SampleRole::Mother
    } else {
        SampleRole::Other
    }
}

pub fn parse_file(path: &Path) -> Result<AnalysisResult, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bytes(&bytes)
}

/// Decode and validate a result document. A result without both a child and
/// an alleged father is rejected.
pub fn parse_bytes(bytes: &[u8]) -> Result<AnalysisResult, ParseError> {
    let raw: RawResultFile = serde_json::from_slice(bytes)?;
    if raw.samples.is_empty() {
        return Err(ParseError::NoSamples);
    }

    let metadata = RunMetadata {
        kit: non_empty(raw.kit),
        instrument: non_empty(raw.instrument),
        run_date: non_empty(raw.run_date)
            .map(|date| parse_run_date(&date))
            .transpose()?,
        case_number: non_empty(raw.case_number),
    };

    let samples = raw
        .samples
        .into_iter()
        .map(finding_from_raw)
        .collect::<Result<Vec<_>, _>>()?;

    let result = AnalysisResult { metadata, samples };
    result.trio()?;
    Ok(result)
}

fn finding_from_raw(raw: RawSample) -> Result<SampleFinding, ParseError> {
    let sample_name = raw.sample_name.trim().to_string();

    let role = match non_empty(raw.role) {
        Some(role) => role.parse().map_err(|source| ParseError::InvalidRole {
            sample: sample_name.clone(),
            source,
        })?,
        None => infer_role(&sample_name),
    };

    let status = match non_empty(raw.status) {
        Some(value) => value
            .parse()
            .map_err(|()| ParseError::InvalidStatus {
                sample: sample_name.clone(),
                value,
            })?,
        None => FindingStatus::default(),
    };

    if let Some(value) = raw.confidence
        && !(0.0..=1.0).contains(&value)
    {
        return Err(ParseError::InvalidConfidence {
            sample: sample_name,
            value,
        });
    }

    let mut profile = StrProfile::new();
    for (locus, calls) in raw.loci {
        let pair = AllelePair::from_calls(&calls.into_calls()).map_err(|source| {
            ParseError::InvalidAllele {
                sample: sample_name.clone(),
                locus: locus.clone(),
                source,
            }
        })?;
        if profile.insert(&locus, pair).is_some() {
            return Err(ParseError::DuplicateLocus {
                sample: sample_name,
                locus,
            });
        }
    }

    let loci_detected = raw
        .loci_detected
        .unwrap_or_else(|| u32::try_from(profile.len()).unwrap_or(u32::MAX));

    Ok(SampleFinding {
        sample_name,
        lab_number: non_empty(raw.lab_number),
        role,
        status,
        confidence: raw.confidence,
        loci_detected,
        issues: raw.issues,
        profile,
    })
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` taken as midnight UTC.
fn parse_run_date(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ParseError::InvalidRunDate(value.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
