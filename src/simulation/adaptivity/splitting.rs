use rand::Rng;

use crate::{
    adaptivity::{
        check_mass_conserved, fit_particle, ideal_sample_count, AdaptivityError,
        MAX_ADAPTIVITY_PASSES, THIN_QUERY_NEIGHBORS,
    },
    concurrency::{par_iter_mut1, par_map1},
    floating_type_mod::FT,
    levelset::{normalize_or_zero, LevelsetField},
    neighborhood_search::{ParticleSorter, PointIndex},
    particles::{clean_particles, total_mass_weight, Particle},
    simulation_parameters::AdaptivityParams,
    VF,
};

/**
 * Expand under-resolved particles into children until the sampling density
 * matches the target-depth field, with a thin-sheet correction that keeps
 * freshly split films from collapsing back together.
 *
 * Runs up to `MAX_ADAPTIVITY_PASSES` propose/expand passes and stops early
 * once a pass produces no children. `split_all` forces every splittable
 * particle regardless of the depth test. Returns the number of particles
 * that were split.
 *
 * The sum of mass weights over live particles is checked after every pass;
 * a mismatch aborts with [`AdaptivityError::MassNotConserved`].
 */
pub fn split_particles<const D: usize>(
    particles: &mut Vec<Particle<D>>,
    sorter: &mut ParticleSorter<D>,
    level: &(impl LevelsetField<D> + Sync),
    surface: &(impl LevelsetField<D> + Sync),
    params: AdaptivityParams,
    split_all: bool,
) -> Result<usize, AdaptivityError> {
    // near-surface samples feeding the thin-sheet correction; grows as
    // passes append children
    let mut thin_points: Vec<VF<D>> = Vec::new();
    let mut thin_radii: Vec<FT> = Vec::new();
    for p in particles.iter() {
        if !p.isolated && !p.removable && p.levelset > -p.radius * params.dpx {
            thin_points.push(p.position);
            thin_radii.push(p.radius);
        }
    }

    let mut rng = rand::thread_rng();
    let mut total_split = 0;

    for pass in 0..MAX_ADAPTIVITY_PASSES {
        let weight_before = total_mass_weight(particles);

        // Propose phase: flag particles carrying more samples than the
        // target-depth field asks for one level finer.
        let flags: Vec<bool> = par_map1(particles, |_i, p| {
            if p.removable || p.isolated || p.levelset > 0. || p.mass_weight <= 1 {
                return false;
            }
            let depth = level.eval_levelset(p.position);
            split_all || ideal_sample_count::<D>(depth, params) < p.mass_weight as FT
        });

        // Expansion phase, strictly sequential appends.
        let mut splitted: Vec<Particle<D>> = Vec::new();
        let mut count = 0;
        for i in 0..particles.len() {
            if !flags[i] {
                continue;
            }
            let parent = particles[i].clone();
            let octant_children = 1u32 << D;

            if parent.mass_weight % octant_children == 0 {
                // octant split: one child per sign combination of the
                // half-radius offset
                let r = 0.5 * params.dpx * parent.radius;
                for corner in 0..octant_children {
                    let mut position = parent.position;
                    for d in 0..D {
                        position[d] += if corner & (1 << d) == 0 { -0.5 * r } else { 0.5 * r };
                    }
                    splitted.push(make_child(
                        &parent,
                        position,
                        parent.mass_weight / octant_children,
                        surface,
                        params.dpx,
                    ));
                }
            } else {
                // binary directional split; near the surface the direction
                // is flattened into the tangent plane of the depth gradient
                let normal = level.eval_gradient(parent.position);
                let mut direction =
                    VF::<D>::from_iterator((0..D).map(|_| rng.gen_range::<FT, _>(-1. ..=1.)));
                if parent.levelset > -0.5 * parent.radius * params.dpx {
                    let tangential = normalize_or_zero(direction - direction.dot(&normal) * normal);
                    if tangential.norm_squared() > 0. {
                        direction = tangential;
                    }
                }

                let offset = params.dpx * parent.radius * direction;
                let half = parent.mass_weight / 2;
                for (k, child_weight) in [half, parent.mass_weight - half].into_iter().enumerate() {
                    let position = parent.position + (k as FT - 0.5) * offset;
                    splitted.push(make_child(&parent, position, child_weight, surface, params.dpx));
                }
            }

            particles[i].removable = true;
            count += 1;
            total_split += 1;
        }

        // Thin-sheet correction: bias near-surface children towards the
        // ideal inter-sheet spacing, then project everyone again.
        if !splitted.is_empty() {
            let thin_index = PointIndex::build(&thin_points);

            let thin_points_ref: &[VF<D>] = &thin_points;
            let thin_radii_ref: &[FT] = &thin_radii;
            let new_positions: Vec<VF<D>> = par_map1(&splitted, |_n, p| {
                if p.levelset > -p.radius * params.dpx {
                    thin_sheet_target(p, thin_points_ref, thin_radii_ref, &thin_index, surface, params.dpx)
                        .unwrap_or(p.position)
                } else {
                    p.position
                }
            });

            par_iter_mut1(&mut splitted, |n, p| {
                p.position = new_positions[n];
                fit_particle(p, surface, params.dpx);
            });

            for p in &splitted {
                if !p.isolated && !p.removable && p.levelset > -p.radius * params.dpx {
                    thin_points.push(p.position);
                    thin_radii.push(p.radius);
                }
            }
        }

        particles.append(&mut splitted);

        let weight_after = total_mass_weight(particles);
        check_mass_conserved("split", pass, weight_before, weight_after)?;

        println!("split pass {}: {} particles", pass, count);
        if count == 0 {
            break;
        }
    }

    clean_particles(particles);
    // children were appended in any case where passes ran
    sorter.set_dirty();
    Ok(total_split)
}

fn make_child<const D: usize>(
    parent: &Particle<D>,
    position: VF<D>,
    mass_weight: u32,
    surface: &impl LevelsetField<D>,
    dpx: FT,
) -> Particle<D> {
    let mut child = Particle::new(position, parent.velocity, mass_weight);
    for d in 0..D {
        child.position[d] = FT::min(1., FT::max(0., child.position[d]));
    }
    let surface_lv = surface.eval_levelset(child.position);
    child.levelset = if surface_lv < 0. { surface_lv } else { parent.levelset };
    child.gradient = parent.gradient;
    child.curvature = parent.curvature;
    child.remesh_radius = parent.remesh_radius;
    fit_particle(&mut child, surface, dpx);
    child
}

/**
 * Weighted average of midpoints between a child and its across-the-sheet
 * neighbors, or `None` when no neighbor contributes.
 *
 * A neighbor contributes when the midpoint lies inside the fluid; its
 * weight is the squared deviation of the midpoint's distance to its
 * governing sample from the ideal half-separation of the two sheets.
 */
fn thin_sheet_target<const D: usize>(
    child: &Particle<D>,
    thin_points: &[VF<D>],
    thin_radii: &[FT],
    thin_index: &PointIndex<D>,
    surface: &impl LevelsetField<D>,
    dpx: FT,
) -> Option<VF<D>> {
    let mut wsum: FT = 0.;
    let mut accum = VF::<D>::zeros();
    for idx in thin_index.k_nearest(child.position, THIN_QUERY_NEIGHBORS) {
        let other = thin_points[idx];
        if (other - child.position).norm_squared() <= 0. {
            continue;
        }
        let mid = 0.5 * (other + child.position);
        if surface.eval_levelset(mid) >= 0. {
            continue;
        }
        if let Some(&governing) = thin_index.k_nearest(mid, 1).first() {
            let deviation = (thin_points[governing] - mid).norm()
                - 0.5 * dpx * (thin_radii[governing] + child.radius);
            let w = deviation * deviation;
            wsum += w;
            accum += w * mid;
        }
    }
    if wsum > 0. {
        Some(accum / wsum)
    } else {
        None
    }
}
