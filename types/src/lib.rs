//! Core domain types for the STR lab pipeline.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod ids;
mod plate;
mod sample;
mod status;

pub use ids::{BatchId, RunId, SampleId};
pub use plate::{
    PLATE_CAPACITY, PLATE_COLUMNS, PLATE_ROWS, PlateError, PlateLayout, WellAssignment,
    WellPosition, WellStatus,
};
pub use sample::{
    Batch, NewBatch, NewSample, PlateAssignment, Sample, SampleRole, UnknownRole,
};
pub use status::{
    BatchOutcome, InvalidTransition, StageType, UnknownStage, UnknownStatus, WorkflowStatus,
};
