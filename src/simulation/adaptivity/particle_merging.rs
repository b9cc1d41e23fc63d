use crate::{
    adaptivity::{
        check_mass_conserved, find_closest_particle, fit_particle, ideal_sample_count,
        AdaptivityError, MAX_ADAPTIVITY_PASSES,
    },
    concurrency::par_map1,
    floating_type_mod::FT,
    levelset::LevelsetField,
    neighborhood_search::ParticleSorter,
    particles::{clean_particles, total_mass_weight, Particle},
    simulation_parameters::AdaptivityParams,
};

/**
 * Contract over-resolved particle pairs until the sampling density matches
 * the target-depth field.
 *
 * Runs up to `MAX_ADAPTIVITY_PASSES` propose/commit passes and stops early
 * once a pass commits nothing. A pair commits only when both particles
 * nominated each other; the lower index at pass start survives. Returns the
 * total number of committed merges.
 *
 * The sum of mass weights over live particles is checked after every pass;
 * a mismatch aborts with [`AdaptivityError::MassNotConserved`].
 */
pub fn merge_particles<const D: usize>(
    particles: &mut Vec<Particle<D>>,
    sorter: &mut ParticleSorter<D>,
    level: &(impl LevelsetField<D> + Sync),
    surface: &(impl LevelsetField<D> + Sync),
    params: AdaptivityParams,
) -> Result<usize, AdaptivityError> {
    sorter.sort(particles);

    let mut total_merged = 0;
    for pass in 0..MAX_ADAPTIVITY_PASSES {
        let weight_before = total_mass_weight(particles);

        // Propose phase: every over-resolved particle inside the fluid
        // nominates its nearest eligible neighbor. Reads the shared particle
        // array, writes only the pass-local proposal vector.
        let particles_ref: &[Particle<D>] = particles;
        let sorter_ref: &ParticleSorter<D> = sorter;
        let mut proposals: Vec<Option<usize>> = par_map1(particles_ref, |i, p| {
            if p.removable || p.isolated || p.levelset > 0. {
                return None;
            }
            let depth = level.eval_levelset(p.position);
            if ideal_sample_count::<D>(depth, params) > p.mass_weight as FT {
                let search_radius = 1.5 * params.dpx * FT::powf(2., depth - 1.);
                find_closest_particle(sorter_ref, particles_ref, i, search_radius)
            } else {
                None
            }
        });

        // Commit phase, strictly sequential: each mutual pair is handled
        // exactly once, at its surviving (lower) index.
        let mut merged_this_pass = 0;
        for i in 0..particles.len() {
            if particles[i].isolated || particles[i].levelset > 0. {
                continue;
            }
            let j = match proposals[i] {
                Some(j) => j,
                None => continue,
            };
            if proposals[j] != Some(i) || j <= i {
                continue;
            }

            let pi = &particles[i];
            let pj = &particles[j];
            let ni = pi.mass_weight as FT;
            let nj = pj.mass_weight as FT;
            let combined = pi.mass_weight + pj.mass_weight;
            let inv_n = 1. / (ni + nj);

            let center = (ni * pi.position + nj * pj.position) * inv_n;

            // the fused particle must still be over-resolved at the blended
            // center, otherwise the pair is skipped this pass
            let depth = level.eval_levelset(center);
            if ideal_sample_count::<D>(depth, params) <= combined as FT {
                continue;
            }

            let velocity = (ni * pi.velocity + nj * pj.velocity) * inv_n;
            let gradient = (ni * pi.gradient + nj * pj.gradient) * inv_n;
            // curvature and remesh radius blend with equal weights
            let curvature = [
                0.5 * (pi.curvature[0] + pj.curvature[0]),
                0.5 * (pi.curvature[1] + pj.curvature[1]),
            ];
            let remesh_radius = 0.5 * (pi.remesh_radius + pj.remesh_radius);

            particles[j].removable = true;
            proposals[j] = None;

            let survivor = &mut particles[i];
            survivor.position = center;
            survivor.velocity = velocity;
            survivor.mass_weight = combined;
            survivor.compute_radius();
            // the fit re-evaluates the cached levelset at the final position,
            // overriding the blend; the gradient keeps the blended value
            fit_particle(survivor, surface, params.dpx);
            survivor.gradient = gradient;
            survivor.curvature = curvature;
            survivor.remesh_radius = remesh_radius;

            merged_this_pass += 1;
            total_merged += 1;
        }

        let weight_after = total_mass_weight(particles);
        check_mass_conserved("merge", pass, weight_before, weight_after)?;

        println!("merge pass {}: {} pairs", pass, merged_this_pass);
        if merged_this_pass == 0 {
            break;
        }
    }

    if clean_particles(particles) {
        sorter.set_dirty();
    }
    Ok(total_merged)
}

#[cfg(test)]
mod tests {
    use super::merge_particles;
    use crate::{
        floating_type_mod::FT,
        levelset::ConstantLevelset,
        neighborhood_search::ParticleSorter,
        particles::{total_mass_weight, Particle},
        simulation_parameters::AdaptivityParams,
        vec3f, V3, VF,
    };

    fn params() -> AdaptivityParams {
        AdaptivityParams { dpx: 0.01, dx: 0.02 }
    }

    /// Particle deep inside the fluid, out of reach of the fit projection.
    fn deep_particle(position: VF<3>, mass_weight: u32) -> Particle<3> {
        let mut p = Particle::new(position, V3::zeros(), mass_weight);
        p.levelset = -0.4;
        p
    }

    /// Uniform surface field far below every particle; the fit never moves
    /// anything and cache refreshes are exact.
    fn deep_surface() -> ConstantLevelset {
        ConstantLevelset { value: -0.4 }
    }

    /// Flat target-depth field whose ideal sample count per particle is
    /// `2^(3 * (value - 1))`.
    fn depth(value: FT) -> ConstantLevelset {
        ConstantLevelset { value }
    }

    #[test]
    fn merges_close_pair_into_mass_weighted_survivor() {
        let mut particles = vec![
            deep_particle(vec3f(0.495, 0.5, 0.5), 1),
            deep_particle(vec3f(0.505, 0.5, 0.5), 1),
        ];
        let mut sorter = ParticleSorter::new();

        let merged =
            merge_particles(&mut particles, &mut sorter, &depth(2.), &deep_surface(), params())
                .unwrap();

        assert_eq!(merged, 1);
        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].mass_weight, 2);
        assert!((particles[0].position - vec3f(0.5, 0.5, 0.5)).norm() < 1e-6);
        assert!((particles[0].radius - (2. as FT).powf(1. / 3.)).abs() < 1e-5);
        assert!(sorter.is_dirty());
    }

    #[test]
    fn merge_blends_velocity_and_caches_by_mass_weight() {
        let mut a = deep_particle(vec3f(0.495, 0.5, 0.5), 3);
        a.velocity = vec3f(1., 0., 0.);
        a.gradient = vec3f(0., 0., 1.);
        a.curvature = [1., 3.];
        a.remesh_radius = 2.;
        let mut b = deep_particle(vec3f(0.505, 0.5, 0.5), 1);
        b.velocity = vec3f(0., 1., 0.);
        b.gradient = vec3f(0., 1., 0.);
        b.curvature = [3., 1.];
        b.remesh_radius = 4.;

        let mut particles = vec![a, b];
        let mut sorter = ParticleSorter::new();
        merge_particles(&mut particles, &mut sorter, &depth(2.), &deep_surface(), params())
            .unwrap();

        assert_eq!(particles.len(), 1);
        let survivor = &particles[0];
        assert_eq!(survivor.mass_weight, 4);
        // position and velocity use mass weights 3:1
        assert!((survivor.position - vec3f(0.4975, 0.5, 0.5)).norm() < 1e-6);
        assert!((survivor.velocity - vec3f(0.75, 0.25, 0.)).norm() < 1e-6);
        assert!((survivor.gradient - vec3f(0., 0.25, 0.75)).norm() < 1e-6);
        // curvature and remesh radius use equal weights
        assert!((survivor.curvature[0] - 2.).abs() < 1e-6);
        assert!((survivor.curvature[1] - 2.).abs() < 1e-6);
        assert!((survivor.remesh_radius - 3.).abs() < 1e-6);
        // the cached levelset is re-evaluated, not blended
        assert!((survivor.levelset + 0.4).abs() < 1e-6);
    }

    #[test]
    fn commits_only_mutual_proposals() {
        // A and B nominate each other; C's nearest is B, but B prefers A, so
        // C must survive the call untouched and unmoved.
        let mut particles = vec![
            deep_particle(vec3f(0.49, 0.5, 0.5), 1),
            deep_particle(vec3f(0.50, 0.5, 0.5), 1),
            deep_particle(vec3f(0.52, 0.5, 0.5), 1),
        ];
        let mut sorter = ParticleSorter::new();

        // ideal count 2.5: pairs of weight 1 fuse, anything heavier is
        // blocked by the post-merge recheck
        let depth_value = 1. + (2.5 as FT).ln() / (3. * (2. as FT).ln());
        let merged = merge_particles(
            &mut particles,
            &mut sorter,
            &depth(depth_value),
            &deep_surface(),
            params(),
        )
        .unwrap();

        assert_eq!(merged, 1);
        assert_eq!(particles.len(), 2);
        assert_eq!(total_mass_weight(&particles), 3);

        let survivor = particles.iter().find(|p| p.mass_weight == 2).unwrap();
        let untouched = particles.iter().find(|p| p.mass_weight == 1).unwrap();
        assert!((survivor.position - vec3f(0.495, 0.5, 0.5)).norm() < 1e-6);
        assert_eq!(untouched.position, vec3f(0.52, 0.5, 0.5));
    }

    #[test]
    fn isolated_and_exterior_particles_are_never_merged() {
        let mut isolated = deep_particle(vec3f(0.495, 0.5, 0.5), 1);
        isolated.isolated = true;
        let mut exterior = deep_particle(vec3f(0.505, 0.51, 0.5), 1);
        exterior.levelset = 0.002;

        let mut particles = vec![
            isolated,
            exterior,
            deep_particle(vec3f(0.5, 0.5, 0.5), 1),
        ];
        let mut sorter = ParticleSorter::new();

        let merged =
            merge_particles(&mut particles, &mut sorter, &depth(2.), &deep_surface(), params())
                .unwrap();

        assert_eq!(merged, 0);
        assert_eq!(particles.len(), 3);
        assert_eq!(total_mass_weight(&particles), 3);
    }

    #[test]
    fn merge_is_idempotent_when_nothing_is_over_resolved() {
        let mut particles = vec![
            deep_particle(vec3f(0.495, 0.5, 0.5), 1),
            deep_particle(vec3f(0.505, 0.5, 0.5), 1),
        ];
        let before: Vec<_> = particles.iter().map(|p| p.position).collect();
        let mut sorter = ParticleSorter::new();

        // ideal count is exactly 1: no particle is over-resolved
        let merged =
            merge_particles(&mut particles, &mut sorter, &depth(1.), &deep_surface(), params())
                .unwrap();

        assert_eq!(merged, 0);
        assert_eq!(particles.len(), 2);
        for (p, position) in particles.iter().zip(before) {
            assert_eq!(p.position, position);
            assert_eq!(p.mass_weight, 1);
            assert!((p.levelset + 0.4).abs() < 1e-6);
        }
        assert!(!sorter.is_dirty());
    }

    #[test]
    fn mass_weight_is_conserved_over_a_cascade_of_passes() {
        // 8 well-separated triplets; in each, the tight pair fuses in the
        // first pass and the straggler joins the survivor in the second
        let mut particles = Vec::new();
        for cluster in 0..8u32 {
            let base = vec3f(
                0.2 + 0.2 * (cluster & 1) as FT,
                0.2 + 0.2 * ((cluster >> 1) & 1) as FT,
                0.2 + 0.2 * ((cluster >> 2) & 1) as FT,
            );
            particles.push(deep_particle(base, 2));
            particles.push(deep_particle(base + vec3f(0.002, 0., 0.), 1));
            particles.push(deep_particle(base + vec3f(0.0045, 0., 0.), 1));
        }
        let weight_before = total_mass_weight(&particles);
        let mut sorter = ParticleSorter::new();

        let merged =
            merge_particles(&mut particles, &mut sorter, &depth(3.), &deep_surface(), params())
                .unwrap();

        assert_eq!(merged, 16);
        assert_eq!(particles.len(), 8);
        assert_eq!(total_mass_weight(&particles), weight_before);
        for p in &particles {
            assert!(!p.removable);
            assert_eq!(p.mass_weight, 4);
        }
        assert!(sorter.is_dirty());
    }
}
