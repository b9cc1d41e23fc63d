use rstar::{primitives::GeomWithData, Point, RTree};

use crate::{floating_type_mod::FT, particles::Particle, VF};

#[derive(Debug, PartialEq, Clone, Copy)]
struct IndexedPoint<const D: usize> {
    p: VF<D>,
}

impl<const D: usize> Point for IndexedPoint<D> {
    type Scalar = FT;

    const DIMENSIONS: usize = D;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        IndexedPoint {
            p: VF::<D>::from_iterator((0..D).map(|d| generator(d))),
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        self.p[index]
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        &mut self.p[index]
    }
}

impl<const D: usize> From<VF<D>> for IndexedPoint<D> {
    fn from(p: VF<D>) -> Self {
        IndexedPoint { p }
    }
}

type IndexedElem<const D: usize> = GeomWithData<IndexedPoint<D>, usize>;

/**
 * k-nearest-neighbor index over the live particle set.
 *
 * The tree is only rebuilt between resampling passes; a dirty sorter is
 * stale and must be re-sorted before its queries are trusted again.
 */
pub struct ParticleSorter<const D: usize> {
    tree: RTree<IndexedElem<D>>,
    dirty: bool,
}

impl<const D: usize> ParticleSorter<D> {
    pub fn new() -> ParticleSorter<D> {
        ParticleSorter {
            tree: RTree::new(),
            dirty: true,
        }
    }

    /// Rebuild the index over the current particle positions and clear the
    /// dirty flag. Tombstoned particles are indexed too; queries filter them.
    pub fn sort(&mut self, particles: &[Particle<D>]) {
        let elems: Vec<_> = particles
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedElem::new(IndexedPoint::from(p.position), idx))
            .collect();
        self.tree = RTree::bulk_load(elems);
        self.dirty = false;
    }

    /// Indices of the up-to-`k` nearest particles to `x`, closest first.
    pub fn k_nearest<'a>(&'a self, x: VF<D>, k: usize) -> impl Iterator<Item = usize> + 'a {
        self.tree
            .nearest_neighbor_iter(&IndexedPoint::from(x))
            .take(k)
            .map(|elem| elem.data)
    }

    /// Topology changed (particles appended or compacted away).
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/**
 * Ephemeral nearest-neighbor index over a bare point set, rebuilt once per
 * split pass for the thin-sheet queries.
 */
pub struct PointIndex<const D: usize> {
    tree: RTree<IndexedElem<D>>,
}

impl<const D: usize> PointIndex<D> {
    pub fn build(points: &[VF<D>]) -> PointIndex<D> {
        let elems: Vec<_> = points
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedElem::new(IndexedPoint::from(*p), idx))
            .collect();
        PointIndex {
            tree: RTree::bulk_load(elems),
        }
    }

    /// Indices into the built point slice of the up-to-`k` nearest points.
    pub fn k_nearest(&self, x: VF<D>, k: usize) -> Vec<usize> {
        self.tree
            .nearest_neighbor_iter(&IndexedPoint::from(x))
            .take(k)
            .map(|elem| elem.data)
            .collect()
    }
}
