use crate::{floating_type_mod::FT, VF};

/**
 * A resampling particle.
 *
 * `mass_weight` counts the elementary samples this particle stands in for;
 * it is the quantity conserved by merging and splitting. The cached fields
 * (`radius`, `levelset`, `gradient`) are derived and must be refreshed after
 * every change to the quantity they derive from.
 */
#[derive(Debug, Clone)]
pub struct Particle<const D: usize> {
    pub position: VF<D>,
    pub velocity: VF<D>,

    /// Number of elementary samples represented by this particle, always >= 1.
    pub mass_weight: u32,
    /// Cached `mass_weight^(1/D)`, in multiples of the sampling spacing.
    pub radius: FT,

    /// Cached surface field value at `position`, negative inside the fluid.
    pub levelset: FT,
    /// Cached unit surface gradient at `position`.
    pub gradient: VF<D>,

    pub curvature: [FT; 2],
    pub remesh_radius: FT,

    /// Free-floating sample (e.g. a detached droplet), exempt from surface
    /// projection and from merge/split. Set by the caller, never here.
    pub isolated: bool,
    /// Tombstone; physically removed by [`clean_particles`].
    pub removable: bool,
}

impl<const D: usize> Particle<D> {
    pub fn new(position: VF<D>, velocity: VF<D>, mass_weight: u32) -> Particle<D> {
        assert!(mass_weight >= 1);
        let mut particle = Particle {
            position,
            velocity,
            mass_weight,
            radius: 0.,
            levelset: 0.,
            gradient: VF::<D>::zeros(),
            curvature: [0.; 2],
            remesh_radius: 0.,
            isolated: false,
            removable: false,
        };
        particle.compute_radius();
        particle
    }

    /// Recompute the cached radius. Must be called after every change of
    /// `mass_weight`.
    pub fn compute_radius(&mut self) {
        self.radius = (self.mass_weight as FT).powf(1. / D as FT);
    }
}

/// Sum of mass weights over the live (non-tombstoned) particles.
pub fn total_mass_weight<const D: usize>(particles: &[Particle<D>]) -> u64 {
    particles
        .iter()
        .filter(|p| !p.removable)
        .map(|p| p.mass_weight as u64)
        .sum()
}

/// Swap-remove every tombstoned particle. Returns whether any entry was
/// removed, in which case the spatial sorter must be re-sorted before use.
pub fn clean_particles<const D: usize>(particles: &mut Vec<Particle<D>>) -> bool {
    let old_len = particles.len();
    let mut last = particles.len();
    let mut i = 0;
    while i < last {
        if particles[i].removable {
            last -= 1;
            particles.swap(i, last);
        } else {
            i += 1;
        }
    }
    particles.truncate(last);
    particles.len() != old_len
}
