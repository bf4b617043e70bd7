//! NaN-ignoring temporal reduction of per-scene index rasters

use canopy_core::error::{CanopyError, Result};
use canopy_core::models::CompositeMethod;
use ndarray::{Array2, Zip};

enum Accumulator {
    /// Running NaN-ignoring maximum
    Max(Option<Array2<f32>>),
    /// Every scene, reduced at the end
    Median(Vec<Array2<f32>>),
}

/// Folds scene rasters on a shared grid into one composite.
///
/// The result does not depend on the order scenes are added.
pub struct Compositor {
    shape: (usize, usize),
    scenes: usize,
    acc: Accumulator,
}

impl Compositor {
    pub fn new(method: CompositeMethod, shape: (usize, usize)) -> Self {
        let acc = match method {
            CompositeMethod::Max => Accumulator::Max(None),
            CompositeMethod::Median => Accumulator::Median(Vec::new()),
        };
        Self { shape, scenes: 0, acc }
    }

    pub fn method(&self) -> CompositeMethod {
        match self.acc {
            Accumulator::Max(_) => CompositeMethod::Max,
            Accumulator::Median(_) => CompositeMethod::Median,
        }
    }

    /// Number of scenes folded in so far
    pub fn scenes(&self) -> usize {
        self.scenes
    }

    pub fn add(&mut self, scene: Array2<f32>) -> Result<()> {
        if scene.dim() != self.shape {
            return Err(CanopyError::Raster(format!(
                "scene shape {:?} differs from composite shape {:?}",
                scene.dim(),
                self.shape
            )));
        }

        match &mut self.acc {
            Accumulator::Max(acc) => match acc {
                None => *acc = Some(scene),
                Some(acc) => {
                    // f32::max returns the other operand when one is NaN
                    Zip::from(acc).and(&scene).for_each(|a, &v| *a = a.max(v));
                }
            },
            Accumulator::Median(stack) => stack.push(scene),
        }

        self.scenes += 1;
        Ok(())
    }

    /// Reduce to the composite; `None` when no scene was added
    pub fn finish(self) -> Option<Array2<f32>> {
        match self.acc {
            Accumulator::Max(acc) => acc,
            Accumulator::Median(stack) => {
                if stack.is_empty() {
                    return None;
                }
                let mut values = Vec::with_capacity(stack.len());
                Some(Array2::from_shape_fn(self.shape, |idx| {
                    values.clear();
                    values.extend(stack.iter().map(|s| s[idx]).filter(|v| v.is_finite()));
                    median(&mut values)
                }))
            }
        }
    }
}

/// Median of finite values; even counts average the two middle values
pub fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    const NAN: f32 = f32::NAN;

    fn composite(method: CompositeMethod, scenes: &[Array2<f32>]) -> Array2<f32> {
        let mut compositor = Compositor::new(method, scenes[0].dim());
        for scene in scenes {
            compositor.add(scene.clone()).unwrap();
        }
        compositor.finish().unwrap()
    }

    fn same(a: &Array2<f32>, b: &Array2<f32>) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    #[test]
    fn test_max_ignores_nan() {
        let out = composite(
            CompositeMethod::Max,
            &[array![[NAN, 0.2, NAN]], array![[0.1, NAN, NAN]], array![[0.05, 0.3, NAN]]],
        );
        assert_eq!(out[[0, 0]], 0.1);
        assert_eq!(out[[0, 1]], 0.3);
        assert!(out[[0, 2]].is_nan());
    }

    #[test]
    fn test_median_even_count() {
        let out = composite(
            CompositeMethod::Median,
            &[array![[0.1, NAN]], array![[0.4, NAN]], array![[0.2, 0.6]], array![[0.3, NAN]]],
        );
        assert!((out[[0, 0]] - 0.25).abs() < 1e-6);
        assert_eq!(out[[0, 1]], 0.6);
    }

    #[test]
    fn test_empty_compositor() {
        assert!(Compositor::new(CompositeMethod::Max, (2, 2)).finish().is_none());
        assert!(Compositor::new(CompositeMethod::Median, (2, 2)).finish().is_none());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut compositor = Compositor::new(CompositeMethod::Max, (1, 2));
        assert!(compositor.add(array![[0.1]]).is_err());
        assert_eq!(compositor.scenes(), 0);
    }

    fn scene_value() -> impl Strategy<Value = f32> {
        prop_oneof![Just(f32::NAN), -1.0f32..1.0]
    }

    proptest! {
        #[test]
        fn prop_composite_is_order_independent(
            values in prop::collection::vec(prop::collection::vec(scene_value(), 6), 1..6),
            median in any::<bool>(),
        ) {
            let method = if median { CompositeMethod::Median } else { CompositeMethod::Max };
            let scenes: Vec<Array2<f32>> = values
                .iter()
                .map(|v| Array2::from_shape_vec((2, 3), v.clone()).unwrap())
                .collect();

            let forward = composite(method, &scenes);
            let mut reversed_scenes = scenes.clone();
            reversed_scenes.reverse();
            let reversed = composite(method, &reversed_scenes);
            reversed_scenes.rotate_left(1);
            let rotated = composite(method, &reversed_scenes);

            prop_assert!(same(&forward, &reversed));
            prop_assert!(same(&forward, &rotated));
        }
    }
}
