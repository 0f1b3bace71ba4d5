//! STR profiles: per-locus allele pairs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Locus names that carry the sex-determination marker rather than an STR.
const SEX_MARKERS: [&str; 2] = ["AMEL", "AMELOGENIN"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid allele value {0:?}")]
pub struct InvalidAllele(pub String);

/// A single allele call (`"12"`, `"9.3"`, `"X"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Allele(String);

impl Allele {
    pub fn new(value: impl AsRef<str>) -> Result<Self, InvalidAllele> {
        let value = value.as_ref().trim();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.');
        if valid {
            Ok(Self(value.to_ascii_uppercase()))
        } else {
            Err(InvalidAllele(value.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Allele {
    type Error = InvalidAllele;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Allele> for String {
    fn from(value: Allele) -> Self {
        value.0
    }
}

/// An unordered pair of alleles. Stored in canonical (sorted) order so that
/// `(12, 13)` and `(13, 12)` are the same call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllelePair {
    first: Allele,
    second: Allele,
}

impl AllelePair {
    #[must_use]
    pub fn new(a: Allele, b: Allele) -> Self {
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    #[must_use]
    pub fn homozygous(allele: Allele) -> Self {
        Self {
            first: allele.clone(),
            second: allele,
        }
    }

    /// Parse one or two raw calls; a single call is homozygous.
    pub fn from_calls<S: AsRef<str>>(calls: &[S]) -> Result<Self, InvalidAllele> {
        match calls {
            [one] => Ok(Self::homozygous(Allele::new(one)?)),
            [a, b] => Ok(Self::new(Allele::new(a)?, Allele::new(b)?)),
            other => Err(InvalidAllele(format!("{} calls", other.len()))),
        }
    }

    #[must_use]
    pub fn first(&self) -> &Allele {
        &self.first
    }

    #[must_use]
    pub fn second(&self) -> &Allele {
        &self.second
    }

    #[must_use]
    pub fn is_homozygous(&self) -> bool {
        self.first == self.second
    }

    /// True when at least one allele of `self` equals one allele of `other`.
    #[must_use]
    pub fn shares_allele_with(&self, other: &AllelePair) -> bool {
        [&self.first, &self.second]
            .into_iter()
            .any(|a| *a == other.first || *a == other.second)
    }
}

impl fmt::Display for AllelePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.first, self.second)
    }
}

/// Normalized locus name (`"d8s1179 "` -> `"D8S1179"`).
#[must_use]
pub fn normalize_locus(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[must_use]
pub fn is_sex_marker(locus: &str) -> bool {
    let normalized = normalize_locus(locus);
    SEX_MARKERS.contains(&normalized.as_str())
}

/// Locus name -> allele pair for one individual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrProfile {
    loci: BTreeMap<String, AllelePair>,
}

impl StrProfile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pair previously held under the same normalized name.
    pub fn insert(&mut self, locus: &str, pair: AllelePair) -> Option<AllelePair> {
        self.loci.insert(normalize_locus(locus), pair)
    }

    #[must_use]
    pub fn get(&self, locus: &str) -> Option<&AllelePair> {
        self.loci.get(&normalize_locus(locus))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loci.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    /// Loci in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AllelePair)> {
        self.loci.iter().map(|(locus, pair)| (locus.as_str(), pair))
    }

    /// STR loci present in both profiles, sex marker excluded, in name order.
    pub fn shared_str_loci<'a>(
        &'a self,
        other: &'a StrProfile,
    ) -> impl Iterator<Item = (&'a str, &'a AllelePair, &'a AllelePair)> {
        self.loci.iter().filter_map(move |(locus, mine)| {
            if is_sex_marker(locus) {
                return None;
            }
            other
                .loci
                .get(locus)
                .map(|theirs| (locus.as_str(), mine, theirs))
        })
    }
}

impl FromIterator<(String, AllelePair)> for StrProfile {
    fn from_iter<I: IntoIterator<Item = (String, AllelePair)>>(iter: I) -> Self {
        let mut profile = Self::new();
        for (locus, pair) in iter {
            profile.insert(&locus, pair);
        }
        profile
    }
}
