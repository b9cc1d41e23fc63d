use crate::{floating_type_mod::FT, VF};

/**
 * Signed-distance style field evaluated at arbitrary points.
 *
 * Two independent instances are consumed by the resampling engines: the
 * target-depth field (its value encodes the desired local sampling
 * resolution) and the surface field (negative inside the fluid).
 */
pub trait LevelsetField<const D: usize> {
    fn eval_levelset(&self, x: VF<D>) -> FT;

    /// Unit gradient at `x`; the zero vector where the gradient degenerates.
    fn eval_gradient(&self, x: VF<D>) -> VF<D>;
}

/// Normalize `v`, mapping degenerate inputs to the zero vector.
pub fn normalize_or_zero<const D: usize>(v: VF<D>) -> VF<D> {
    let norm2 = v.norm_squared();
    if norm2 > 0. {
        v / norm2.sqrt()
    } else {
        VF::<D>::zeros()
    }
}

/**
 * Central-difference gradient of a field, NOT normalized.
 *
 * For implementations without an analytic gradient and for validating the
 * analytic ones.
 */
pub fn finite_diff_gradient<const D: usize>(
    field: &impl LevelsetField<D>,
    x: VF<D>,
    eps: FT,
) -> VF<D> {
    let inv_2eps = 1. / (2. * eps);

    let iter = (0..D).map(|i| {
        let mut xp = x;
        let mut xn = x;
        xp[i] += eps;
        xn[i] -= eps;
        (field.eval_levelset(xp) - field.eval_levelset(xn)) * inv_2eps
    });

    VF::<D>::from_iterator(iter)
}

/// Ball of fluid (negative inside), e.g. a droplet or a filled tank blob.
#[derive(Debug, Clone, Copy)]
pub struct SphereLevelset<const D: usize> {
    pub center: VF<D>,
    pub radius: FT,
}

impl<const D: usize> LevelsetField<D> for SphereLevelset<D> {
    fn eval_levelset(&self, x: VF<D>) -> FT {
        (x - self.center).norm() - self.radius
    }

    fn eval_gradient(&self, x: VF<D>) -> VF<D> {
        normalize_or_zero(x - self.center)
    }
}

/// Half-space of fluid filling `normal . x < offset`. `normal` is unit length.
#[derive(Debug, Clone, Copy)]
pub struct PlaneLevelset<const D: usize> {
    pub normal: VF<D>,
    pub offset: FT,
}

impl<const D: usize> LevelsetField<D> for PlaneLevelset<D> {
    fn eval_levelset(&self, x: VF<D>) -> FT {
        self.normal.dot(&x) - self.offset
    }

    fn eval_gradient(&self, _x: VF<D>) -> VF<D> {
        self.normal
    }
}

/// Uniform field value with a vanishing gradient. Doubles as a flat
/// target-depth field.
#[derive(Debug, Clone, Copy)]
pub struct ConstantLevelset {
    pub value: FT,
}

impl<const D: usize> LevelsetField<D> for ConstantLevelset {
    fn eval_levelset(&self, _x: VF<D>) -> FT {
        self.value
    }

    fn eval_gradient(&self, _x: VF<D>) -> VF<D> {
        VF::<D>::zeros()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Levelset<const D: usize> {
    SphereLevelset(SphereLevelset<D>),
    PlaneLevelset(PlaneLevelset<D>),
    ConstantLevelset(ConstantLevelset),
}

impl<const D: usize> From<SphereLevelset<D>> for Levelset<D> {
    fn from(v: SphereLevelset<D>) -> Self {
        Levelset::SphereLevelset(v)
    }
}

impl<const D: usize> From<PlaneLevelset<D>> for Levelset<D> {
    fn from(v: PlaneLevelset<D>) -> Self {
        Levelset::PlaneLevelset(v)
    }
}

impl<const D: usize> From<ConstantLevelset> for Levelset<D> {
    fn from(v: ConstantLevelset) -> Self {
        Levelset::ConstantLevelset(v)
    }
}

impl<const D: usize> LevelsetField<D> for Levelset<D> {
    fn eval_levelset(&self, x: VF<D>) -> FT {
        match self {
            Levelset::SphereLevelset(v) => v.eval_levelset(x),
            Levelset::PlaneLevelset(v) => v.eval_levelset(x),
            Levelset::ConstantLevelset(v) => {
                <ConstantLevelset as LevelsetField<D>>::eval_levelset(v, x)
            }
        }
    }

    fn eval_gradient(&self, x: VF<D>) -> VF<D> {
        match self {
            Levelset::SphereLevelset(v) => v.eval_gradient(x),
            Levelset::PlaneLevelset(v) => v.eval_gradient(x),
            Levelset::ConstantLevelset(v) => {
                <ConstantLevelset as LevelsetField<D>>::eval_gradient(v, x)
            }
        }
    }
}
