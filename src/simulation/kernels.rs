use crate::floating_type_mod::FT;

/**
 * Sharp interpolation weight over the squared distance `r2` with support
 * radius `h`. Diverges towards the center (clamped by the 1e-5 floor), so
 * close samples dominate the interpolation.
 */
pub fn sharp_kernel(r2: FT, h: FT) -> FT {
    FT::max(h * h / FT::max(1.0e-5, r2) - 1., 0.)
}

/// Smooth quadratic falloff over the squared distance `r2`, 1 at the center
/// and 0 at the support radius `h`.
pub fn smooth_kernel(r2: FT, h: FT) -> FT {
    FT::max(1. - r2 / (h * h), 0.)
}

#[cfg(test)]
mod tests {
    use super::{sharp_kernel, smooth_kernel};

    #[test]
    fn kernels_vanish_outside_the_support_radius() {
        let h = 0.1;
        assert_eq!(sharp_kernel(h * h, h), 0.);
        assert_eq!(sharp_kernel(4. * h * h, h), 0.);
        assert_eq!(smooth_kernel(h * h, h), 0.);
        assert_eq!(smooth_kernel(4. * h * h, h), 0.);
    }

    #[test]
    fn kernels_are_positive_and_decreasing_inside() {
        let h = 0.1;
        let near = 0.01 * h * h;
        let far = 0.25 * h * h;
        assert!(sharp_kernel(near, h) > sharp_kernel(far, h));
        assert!(sharp_kernel(far, h) > 0.);
        assert!(smooth_kernel(near, h) > smooth_kernel(far, h));
        assert!(smooth_kernel(far, h) > 0.);
    }

    #[test]
    fn smooth_kernel_is_one_at_the_center() {
        assert!((smooth_kernel(0., 0.25) - 1.).abs() < 1e-6);
    }
}
