//! Paternity locus comparison.
//!
//! Everything here is a pure function of its inputs: no clock, no storage, no
//! randomness. Loci are visited in name order, so the order in which a profile
//! was built never changes the outcome.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{AllelePair, StrProfile};

/// Excluding loci at or above this count give a hard exclusion.
pub const HARD_EXCLUSION_LOCI: u32 = 3;
/// Matching loci (with no exclusions) needed for the strongest inclusion.
pub const STRONG_INCLUSION_LOCI: u32 = 13;
/// Matching loci (with no exclusions) needed for any inclusion.
pub const INCLUSION_LOCI: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocusVerdict {
    Match,
    Exclude,
}

impl LocusVerdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Exclude => "exclude",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown locus verdict: {0}")]
pub struct UnknownVerdict(pub String);

impl FromStr for LocusVerdict {
    type Err = UnknownVerdict;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match" => Ok(Self::Match),
            "exclude" => Ok(Self::Exclude),
            other => Err(UnknownVerdict(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conclusion {
    Inclusion,
    Exclusion,
    Inconclusive,
}

impl Conclusion {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inclusion => "INCLUSION",
            Self::Exclusion => "EXCLUSION",
            Self::Inconclusive => "INCONCLUSIVE",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown conclusion: {0}")]
pub struct UnknownConclusion(pub String);

impl FromStr for Conclusion {
    type Err = UnknownConclusion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCLUSION" => Ok(Self::Inclusion),
            "EXCLUSION" => Ok(Self::Exclusion),
            "INCONCLUSIVE" => Ok(Self::Inconclusive),
            other => Err(UnknownConclusion(other.to_string())),
        }
    }
}

/// Map locus counts to a conclusion and probability of paternity (percent).
#[must_use]
pub fn classify(matching_loci: u32, excluding_loci: u32) -> (Conclusion, f64) {
    match (excluding_loci, matching_loci) {
        (e, _) if e >= HARD_EXCLUSION_LOCI => (Conclusion::Exclusion, 0.0),
        // One or two clean exclusions still outweigh the matches, flagged for review.
        (1 | 2, _) => (Conclusion::Exclusion, 0.01),
        (0, m) if m >= STRONG_INCLUSION_LOCI => (Conclusion::Inclusion, 99.99),
        (0, m) if m >= INCLUSION_LOCI => (Conclusion::Inclusion, 99.9),
        _ => (Conclusion::Inconclusive, 50.0),
    }
}

/// One row of the triad comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocusComparison {
    pub locus: String,
    pub child: AllelePair,
    pub alleged_father: AllelePair,
    pub mother: Option<AllelePair>,
    pub verdict: LocusVerdict,
}

/// Informational child/mother consistency check. Never changes the conclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaternalCheck {
    pub loci_compared: u32,
    pub matching_loci: u32,
    /// Percentage of compared loci where child and mother share an allele.
    pub match_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub comparisons: Vec<LocusComparison>,
    pub loci_compared: u32,
    pub matching_loci: u32,
    pub excluding_loci: u32,
    pub conclusion: Conclusion,
    pub probability: f64,
    pub maternal: Option<MaternalCheck>,
}

/// Compare a child against an alleged father, optionally checking the mother.
#[must_use]
pub fn compare(
    child: &StrProfile,
    alleged_father: &StrProfile,
    mother: Option<&StrProfile>,
) -> ComparisonReport {
    let comparisons: Vec<LocusComparison> = child
        .shared_str_loci(alleged_father)
        .map(|(locus, child_pair, father_pair)| LocusComparison {
            locus: locus.to_string(),
            child: child_pair.clone(),
            alleged_father: father_pair.clone(),
            mother: mother.and_then(|m| m.get(locus)).cloned(),
            verdict: if child_pair.shares_allele_with(father_pair) {
                LocusVerdict::Match
            } else {
                LocusVerdict::Exclude
            },
        })
        .collect();

    let matching_loci = comparisons
        .iter()
        .filter(|c| c.verdict == LocusVerdict::Match)
        .count() as u32;
    let loci_compared = comparisons.len() as u32;
    let excluding_loci = loci_compared - matching_loci;
    let (conclusion, probability) = classify(matching_loci, excluding_loci);

    ComparisonReport {
        comparisons,
        loci_compared,
        matching_loci,
        excluding_loci,
        conclusion,
        probability,
        maternal: mother.map(|m| maternal_check(child, m)),
    }
}

fn maternal_check(child: &StrProfile, mother: &StrProfile) -> MaternalCheck {
    let (compared, matching) = child
        .shared_str_loci(mother)
        .fold((0u32, 0u32), |(compared, matching), (_, c, m)| {
            (compared + 1, matching + u32::from(c.shares_allele_with(m)))
        });
    let match_rate = if compared == 0 {
        0.0
    } else {
        f64::from(matching) * 100.0 / f64::from(compared)
    };
    MaternalCheck {
        loci_compared: compared,
        matching_loci: matching,
        match_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCI: [&str; 15] = [
        "CSF1PO", "D13S317", "D16S539", "D18S51", "D19S433", "D21S11", "D2S1338", "D3S1358",
        "D5S818", "D7S820", "D8S1179", "FGA", "TH01", "TPOX", "VWA",
    ];

    fn pair(a: &str, b: &str) -> AllelePair {
        AllelePair::from_calls(&[a, b]).unwrap()
    }

    /// Child and father share allele "10" everywhere; the first `excluded`
    /// loci are rewritten so the father shares nothing.
    fn trio(loci: usize, excluded: usize) -> (StrProfile, StrProfile) {
        let mut child = StrProfile::new();
        let mut father = StrProfile::new();
        for (i, locus) in LOCI.iter().take(loci).enumerate() {
            child.insert(locus, pair("10", "11"));
            if i < excluded {
                father.insert(locus, pair("20", "21"));
            } else {
                father.insert(locus, pair("10", "12"));
            }
        }
        child.insert("AMEL", pair("X", "X"));
        father.insert("AMEL", pair("X", "Y"));
        (child, father)
    }

    #[test]
    fn thirteen_matches_is_strong_inclusion() {
        let (child, father) = trio(13, 0);
        let report = compare(&child, &father, None);
        assert_eq!(report.loci_compared, 13);
        assert_eq!(report.matching_loci, 13);
        assert_eq!(report.excluding_loci, 0);
        assert_eq!(report.conclusion, Conclusion::Inclusion);
        assert!((report.probability - 99.99).abs() < f64::EPSILON);
        assert!(report.maternal.is_none());
    }

    #[test]
    fn ten_to_twelve_matches_is_inclusion() {
        for n in 10..13 {
            let (child, father) = trio(n, 0);
            let report = compare(&child, &father, None);
            assert_eq!(report.conclusion, Conclusion::Inclusion, "{n} loci");
            assert!((report.probability - 99.9).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn three_exclusions_is_hard_exclusion() {
        let (child, father) = trio(15, 3);
        let report = compare(&child, &father, None);
        assert_eq!(report.excluding_loci, 3);
        assert_eq!(report.conclusion, Conclusion::Exclusion);
        assert!(report.probability.abs() < f64::EPSILON);
    }

    #[test]
    fn one_or_two_exclusions_is_flagged_exclusion() {
        for excluded in [1, 2] {
            let (child, father) = trio(15, excluded);
            let report = compare(&child, &father, None);
            assert_eq!(report.conclusion, Conclusion::Exclusion);
            assert!((report.probability - 0.01).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn few_loci_is_inconclusive() {
        let (child, father) = trio(9, 0);
        let report = compare(&child, &father, None);
        assert_eq!(report.conclusion, Conclusion::Inconclusive);
        assert!((report.probability - 50.0).abs() < f64::EPSILON);

        let report = compare(&StrProfile::new(), &StrProfile::new(), None);
        assert_eq!(report.loci_compared, 0);
        assert_eq!(report.conclusion, Conclusion::Inconclusive);
    }

    #[test]
    fn sex_marker_is_never_compared() {
        let (child, father) = trio(13, 0);
        let report = compare(&child, &father, None);
        assert!(report.comparisons.iter().all(|c| c.locus != "AMEL"));
    }

    #[test]
    fn locus_insertion_order_does_not_matter() {
        let (child, father) = trio(15, 2);
        let reversed_child: StrProfile = child
            .iter()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|(l, p)| (l.to_string(), p.clone()))
            .collect();
        let reversed_father: StrProfile = father
            .iter()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|(l, p)| (l.to_string(), p.clone()))
            .collect();
        assert_eq!(
            compare(&child, &father, None),
            compare(&reversed_child, &reversed_father, None)
        );
    }

    #[test]
    fn mother_is_informational_only() {
        let (child, father) = trio(13, 0);
        let mut mother = StrProfile::new();
        for (i, locus) in LOCI.iter().take(13).enumerate() {
            if i < 12 {
                mother.insert(locus, pair("11", "15"));
            } else {
                mother.insert(locus, pair("30", "31"));
            }
        }
        let with_mother = compare(&child, &father, Some(&mother));
        let without = compare(&child, &father, None);
        assert_eq!(with_mother.conclusion, without.conclusion);
        assert_eq!(with_mother.matching_loci, without.matching_loci);

        let maternal = with_mother.maternal.unwrap();
        assert_eq!(maternal.loci_compared, 13);
        assert_eq!(maternal.matching_loci, 12);
        assert!((maternal.match_rate - 1200.0 / 13.0).abs() < 1e-9);
        assert_eq!(with_mother.comparisons[0].mother, Some(pair("11", "15")));
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(20, 3).0, Conclusion::Exclusion);
        assert_eq!(classify(0, 0).0, Conclusion::Inconclusive);
        assert_eq!(classify(9, 0).0, Conclusion::Inconclusive);
        assert_eq!(classify(10, 0).0, Conclusion::Inclusion);
        assert_eq!(classify(12, 0).1, 99.9);
        assert_eq!(classify(13, 0).1, 99.99);
    }
}
