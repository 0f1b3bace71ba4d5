//! Groups ready samples into 96-well plate batches.

use strlab_types::{NewBatch, PLATE_CAPACITY, PlateLayout, Sample, SampleId, StageType};

use crate::error::AssignError;

/// Thresholds for forming a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Fewest ready samples worth running a plate for.
    pub min_batch_size: usize,
    /// Most samples per plate; never above plate capacity.
    pub max_batch_size: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            min_batch_size: 8,
            max_batch_size: PLATE_CAPACITY,
        }
    }
}

impl BatchPolicy {
    #[must_use]
    pub fn is_ready(&self, candidates: usize) -> bool {
        candidates > 0 && candidates >= self.min_batch_size
    }

    fn capacity(&self) -> usize {
        self.max_batch_size.clamp(1, PLATE_CAPACITY)
    }
}

/// A laid-out batch plus the candidates that did not fit on the plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    pub batch: NewBatch,
    pub overflow: Vec<SampleId>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchAssigner {
    policy: BatchPolicy,
}

impl BatchAssigner {
    #[must_use]
    pub fn new(policy: BatchPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Lay out candidates row-major from `A1`, oldest intake first (ties by id).
    /// Candidates beyond the plate go to `overflow` in the same order.
    pub fn assign(
        &self,
        stage: StageType,
        candidates: &[Sample],
    ) -> Result<PlannedBatch, AssignError> {
        if candidates.is_empty() {
            return Err(AssignError::EmptyBatch);
        }

        let mut ordered: Vec<&Sample> = candidates.iter().collect();
        ordered.sort_by_key(|sample| (sample.collected_at, sample.id));

        let capacity = self.policy.capacity();
        let (placed, rest) = ordered.split_at(ordered.len().min(capacity));
        let ids: Vec<SampleId> = placed.iter().map(|sample| sample.id).collect();

        Ok(PlannedBatch {
            batch: NewBatch {
                stage,
                layout: layout_for(&ids)?,
            },
            overflow: rest.iter().map(|sample| sample.id).collect(),
        })
    }
}

/// Place `ids` in order from `A1`. More than a plate's worth is an error.
pub fn layout_for(ids: &[SampleId]) -> Result<PlateLayout, AssignError> {
    if ids.is_empty() {
        return Err(AssignError::EmptyBatch);
    }
    let mut layout = PlateLayout::new();
    for &id in ids {
        layout.push(id)?;
    }
    Ok(layout)
}
