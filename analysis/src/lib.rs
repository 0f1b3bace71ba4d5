//! STR profile comparison and instrument result parsing.
//!
//! No storage and no IO beyond reading a single result file.

mod comparator;
mod parser;
mod profile;

pub use comparator::{
    ComparisonReport, Conclusion, HARD_EXCLUSION_LOCI, INCLUSION_LOCI, LocusComparison,
    LocusVerdict, MaternalCheck, STRONG_INCLUSION_LOCI, UnknownConclusion, UnknownVerdict,
    classify, compare,
};
pub use parser::{
    AnalysisResult, FindingStatus, ParseError, RunMetadata, SampleFinding, Trio, infer_role,
    parse_bytes, parse_file,
};
pub use profile::{Allele, AllelePair, InvalidAllele, StrProfile, is_sex_marker, normalize_locus};
