/*!
Adaptive resampling core of a particle-based free-surface fluid simulator.

Merges over-resolved particles and splits under-resolved ones so that the
local sampling density follows a target resolution field anchored to the
fluid interface, while exactly conserving the integer mass weight carried
per particle.
*/

mod simulation;

pub use simulation::*;
