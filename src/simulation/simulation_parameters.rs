use crate::floating_type_mod::FT;
use serde::{Deserialize, Serialize};

/// Spacing parameters consumed by the resampling engines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptivityParams {
    /// Sampling spacing scale: the target distance between unit-weight
    /// particles, in domain units.
    pub dpx: FT,

    /// Base cell size of the underlying simulation grid.
    pub dx: FT,
}

impl AdaptivityParams {
    /// Cells-per-sample ratio driving the depth to sample-count mapping.
    pub fn sample_ratio(&self) -> FT {
        self.dx / self.dpx
    }
}
