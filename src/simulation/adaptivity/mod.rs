use std::{error::Error, fmt};

use crate::{
    floating_type_mod::FT,
    kernels::sharp_kernel,
    levelset::LevelsetField,
    neighborhood_search::ParticleSorter,
    particles::Particle,
    simulation_parameters::AdaptivityParams,
    VF,
};

pub mod particle_merging;
pub mod splitting;

/// Pass ceiling shared by the merge and split engines.
pub const MAX_ADAPTIVITY_PASSES: usize = 5;

/// Projection iterations of the fit step.
pub const FIT_ITERATIONS: usize = 3;

/// Neighbor candidates inspected by the pairing query.
pub const PAIR_QUERY_NEIGHBORS: usize = 6;

/// Neighbor candidates inspected by the thin-sheet correction.
pub const THIN_QUERY_NEIGHBORS: usize = 24;

/// Upper bound on the squared pairing distance. Assumes a unit-scale domain;
/// non-normalized domains must reparameterize this bound.
pub const MAX_PAIR_DISTANCE2: FT = 1.;

/**
 * Non-recoverable resampling failure.
 *
 * Mass accounting is checked after every pass of both engines; a mismatch
 * means the particle state is corrupted and the engine aborts immediately
 * without producing a partial result. The owning simulation loop decides
 * whether to shut down or report.
 */
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AdaptivityError {
    MassNotConserved {
        operation: &'static str,
        pass: usize,
        before: u64,
        after: u64,
    },
}

impl fmt::Display for AdaptivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptivityError::MassNotConserved {
                operation,
                pass,
                before,
                after,
            } => write!(
                f,
                "{} mass not conserved in pass {}: sum of mass weights changed from {} to {}",
                operation, pass, before, after
            ),
        }
    }
}

impl Error for AdaptivityError {}

pub(crate) fn check_mass_conserved(
    operation: &'static str,
    pass: usize,
    before: u64,
    after: u64,
) -> Result<(), AdaptivityError> {
    if before == after {
        Ok(())
    } else {
        Err(AdaptivityError::MassNotConserved {
            operation,
            pass,
            before,
            after,
        })
    }
}

/**
 * Elementary samples a single particle should carry at the given depth of
 * the target-depth field.
 *
 * A particle is over-resolved (merge side) where this exceeds its mass
 * weight and under-resolved (split side) where its mass weight exceeds it.
 */
pub fn ideal_sample_count<const D: usize>(depth: FT, params: AdaptivityParams) -> FT {
    params.sample_ratio().powf(depth - 1.).powi(D as i32)
}

/**
 * Pull a particle onto its target standoff distance from the surface.
 *
 * Each iteration evaluates the signed distance and, when the deviation from
 * the ideal standoff `-0.5 * dpx * radius` lies within the capture band of
 * 1.25 standoffs, steps along the negative gradient by the signed error.
 * Isolated particles are never moved, but their cached levelset and
 * gradient are refreshed like everyone else's.
 */
pub fn fit_particle<const D: usize>(
    particle: &mut Particle<D>,
    surface: &impl LevelsetField<D>,
    dpx: FT,
) {
    for _ in 0..FIT_ITERATIONS {
        let lv = surface.eval_levelset(particle.position);
        let r = 0.5 * dpx * particle.radius;
        let dist = FT::abs(lv + r);
        if dist < 1.25 * r && !particle.isolated {
            let grad = surface.eval_gradient(particle.position);
            particle.position -= (lv + r) * grad;
        }
    }
    particle.levelset = surface.eval_levelset(particle.position);
    particle.gradient = surface.eval_gradient(particle.position);
}

/**
 * Strictly nearest live neighbor of particle `i` within radius `r`.
 *
 * Inspects the `PAIR_QUERY_NEIGHBORS` closest candidates, skipping the
 * particle itself and tombstoned entries. Returns `None` when no candidate
 * lies below both the domain-scale sentinel and `r`. Non-mutating, so it is
 * safe inside the parallel propose phase.
 */
pub fn find_closest_particle<const D: usize>(
    sorter: &ParticleSorter<D>,
    particles: &[Particle<D>],
    i: usize,
    r: FT,
) -> Option<usize> {
    let mut nearest = None;
    let mut min_d2 = MAX_PAIR_DISTANCE2;
    let r2 = r * r;
    for j in sorter.k_nearest(particles[i].position, PAIR_QUERY_NEIGHBORS) {
        if particles[j].removable || j == i {
            continue;
        }
        let d2 = (particles[j].position - particles[i].position).norm_squared();
        if d2 < min_d2 && d2 < r2 {
            nearest = Some(j);
            min_d2 = d2;
        }
    }
    nearest
}

/**
 * Mass-weight and kernel weighted velocity average of `neighbors` at `pos`.
 *
 * `None` when every neighbor lies outside its own support radius (the
 * caller keeps whatever velocity it already has).
 */
pub fn sample_velocity<const D: usize>(
    particles: &[Particle<D>],
    neighbors: &[usize],
    pos: VF<D>,
    dpx: FT,
) -> Option<VF<D>> {
    let mut wsum: FT = 0.;
    let mut velocity = VF::<D>::zeros();
    for &j in neighbors {
        let p = &particles[j];
        let w = p.mass_weight as FT * sharp_kernel((pos - p.position).norm_squared(), p.radius * dpx);
        velocity += w * p.velocity;
        wsum += w;
    }
    if wsum > 0. {
        Some(velocity / wsum)
    } else {
        None
    }
}
