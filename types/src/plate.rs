//! 96-well plate addressing and layouts.
//!
//! Pure domain types with no IO. A `WellPosition` can only name one of the 96
//! physical wells, so a layout keyed by it can never exceed plate capacity.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SampleId;

pub const PLATE_ROWS: u8 = 8;
pub const PLATE_COLUMNS: u8 = 12;
pub const PLATE_CAPACITY: usize = PLATE_ROWS as usize * PLATE_COLUMNS as usize;

const ROW_LETTERS: &[u8; 8] = b"ABCDEFGH";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlateError {
    #[error("invalid well position: {0:?}")]
    InvalidWell(String),
    #[error("well {0} is already occupied")]
    WellOccupied(WellPosition),
    #[error("sample {0} is already on this plate")]
    DuplicateSample(SampleId),
    #[error("plate is full ({PLATE_CAPACITY} wells)")]
    CapacityExceeded,
}

/// One well on an 8 x 12 plate. Ordering is row-major (`A1 < A2 < ... < A12 < B1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WellPosition {
    row: u8,
    column: u8,
}

impl WellPosition {
    /// Build from zero-based row and column.
    #[must_use]
    pub fn new(row: u8, column: u8) -> Option<Self> {
        (row < PLATE_ROWS && column < PLATE_COLUMNS).then_some(Self { row, column })
    }

    /// Row-major index `0..96` to well (`0 -> A1`, `12 -> B1`, `95 -> H12`).
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= PLATE_CAPACITY {
            return None;
        }
        let columns = PLATE_COLUMNS as usize;
        Self::new((index / columns) as u8, (index % columns) as u8)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.row as usize * PLATE_COLUMNS as usize + self.column as usize
    }

    #[must_use]
    pub fn row_letter(self) -> char {
        ROW_LETTERS[self.row as usize] as char
    }

    /// One-based column number as printed on the plate.
    #[must_use]
    pub fn column_number(self) -> u8 {
        self.column + 1
    }

    /// Every well in row-major order.
    pub fn all() -> impl Iterator<Item = WellPosition> {
        (0..PLATE_CAPACITY).filter_map(Self::from_index)
    }
}

impl fmt::Display for WellPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_letter(), self.column_number())
    }
}

impl FromStr for WellPosition {
    type Err = PlateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlateError::InvalidWell(s.to_string());
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let letter = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
        let row = ROW_LETTERS
            .iter()
            .position(|&l| l as char == letter)
            .ok_or_else(invalid)?;
        let column: u8 = chars.as_str().parse().map_err(|_| invalid())?;
        if column == 0 {
            return Err(invalid());
        }
        Self::new(row as u8, column - 1).ok_or_else(invalid)
    }
}

impl TryFrom<String> for WellPosition {
    type Error = PlateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WellPosition> for String {
    fn from(value: WellPosition) -> Self {
        value.to_string()
    }
}

/// Processing state of a single well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellStatus {
    Assigned,
    Completed,
    Failed,
}

impl WellStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellAssignment {
    pub sample_id: SampleId,
    pub status: WellStatus,
}

/// Well -> sample mapping for one plate. Serializes as `{"A1": {...}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlateLayout {
    wells: BTreeMap<WellPosition, WellAssignment>,
}

impl PlateLayout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.wells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.wells.len() >= PLATE_CAPACITY
    }

    /// Place a sample in a specific well.
    pub fn assign(&mut self, well: WellPosition, sample_id: SampleId) -> Result<(), PlateError> {
        if self.wells.contains_key(&well) {
            return Err(PlateError::WellOccupied(well));
        }
        if self.contains_sample(sample_id) {
            return Err(PlateError::DuplicateSample(sample_id));
        }
        self.wells.insert(
            well,
            WellAssignment {
                sample_id,
                status: WellStatus::Assigned,
            },
        );
        Ok(())
    }

    /// Place a sample in the first free well, row-major from `A1`.
    pub fn push(&mut self, sample_id: SampleId) -> Result<WellPosition, PlateError> {
        let well = WellPosition::all()
            .find(|well| !self.wells.contains_key(well))
            .ok_or(PlateError::CapacityExceeded)?;
        self.assign(well, sample_id)?;
        Ok(well)
    }

    #[must_use]
    pub fn get(&self, well: WellPosition) -> Option<&WellAssignment> {
        self.wells.get(&well)
    }

    #[must_use]
    pub fn contains_sample(&self, sample_id: SampleId) -> bool {
        self.wells.values().any(|a| a.sample_id == sample_id)
    }

    #[must_use]
    pub fn well_of(&self, sample_id: SampleId) -> Option<WellPosition> {
        self.wells
            .iter()
            .find(|(_, a)| a.sample_id == sample_id)
            .map(|(well, _)| *well)
    }

    /// Samples in well order.
    #[must_use]
    pub fn sample_ids(&self) -> Vec<SampleId> {
        self.wells.values().map(|a| a.sample_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WellPosition, &WellAssignment)> {
        self.wells.iter().map(|(well, a)| (*well, a))
    }

    pub fn set_all_status(&mut self, status: WellStatus) {
        for assignment in self.wells.values_mut() {
            assignment.status = status;
        }
    }
}
