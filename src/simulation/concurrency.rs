use rayon::prelude::*;

pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
    arr1.into_par_iter().enumerate().for_each(|(idx, v1)| {
        f(idx, v1);
    });
}

/// Side-effect-free parallel map; the propose phases of the resampling
/// engines use this to write per-particle scratch without synchronization.
pub fn par_map1<T: Sync, X: Send, F: Fn(usize, &T) -> X + Send + Sync>(arr: &[T], f: F) -> Vec<X> {
    arr.par_iter().enumerate().map(|(idx, v)| f(idx, v)).collect()
}
