use image::Rgb;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Color of class 0
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Multiplier used to spread overflow class ids across seeds
const OVERFLOW_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Class id to display color table
///
/// The first `size` colors are generated up front from a single seeded
/// generator, so lookups in that range never lock. Ids past the table get a
/// color derived from `(seed, class_id)` alone and are cached on first use.
/// Either way a color only depends on the seed and the id, never on the order
/// in which ids are looked up.
pub struct ColorPalette {
    seed: u64,
    colors: Vec<Rgb<u8>>,
    overflow: RwLock<HashMap<usize, Rgb<u8>>>,
}

impl ColorPalette {
    pub fn new(size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut colors = Vec::with_capacity(size.max(1));
        colors.push(BACKGROUND);
        while colors.len() < size {
            colors.push(random_color(&mut rng));
        }

        tracing::debug!("Built class palette with {} colors (seed {})", colors.len(), seed);

        Self {
            seed,
            colors,
            overflow: RwLock::new(HashMap::new()),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of precomputed colors
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Stable display color for `class_id`
    pub fn color(&self, class_id: usize) -> Rgb<u8> {
        if let Some(color) = self.colors.get(class_id) {
            return *color;
        }

        if let Some(color) = self.overflow.read().get(&class_id) {
            return *color;
        }

        // Another thread may have inserted between the two locks; keep its entry
        let mut overflow = self.overflow.write();
        *overflow.entry(class_id).or_insert_with(|| {
            let mut rng =
                StdRng::seed_from_u64(self.seed ^ (class_id as u64).wrapping_mul(OVERFLOW_SEED_MIX));
            random_color(&mut rng)
        })
    }
}

impl std::fmt::Debug for ColorPalette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorPalette")
            .field("seed", &self.seed)
            .field("len", &self.colors.len())
            .field("overflow", &self.overflow.read().len())
            .finish()
    }
}

fn random_color(rng: &mut StdRng) -> Rgb<u8> {
    loop {
        let color = Rgb([rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()]);
        if color != BACKGROUND {
            return color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_background_is_black() {
        let palette = ColorPalette::new(21, 7);
        assert_eq!(palette.color(0), BACKGROUND);
        assert_eq!(palette.len(), 21);
    }

    #[test]
    fn test_lookup_is_cached() {
        let palette = ColorPalette::new(4, 7);
        assert_eq!(palette.color(3), palette.color(3));
        // Overflow ids are generated lazily, then reused
        let first = palette.color(1000);
        assert_eq!(palette.color(1000), first);
    }

    #[test]
    fn test_same_seed_same_colors() {
        let a = ColorPalette::new(16, 42);
        let b = ColorPalette::new(16, 42);
        for id in 0..64 {
            assert_eq!(a.color(id), b.color(id));
        }
    }

    #[test]
    fn test_encounter_order_does_not_matter() {
        let forward = ColorPalette::new(8, 99);
        let backward = ColorPalette::new(8, 99);

        let ids = [2usize, 7, 12, 40, 9];
        let first: Vec<_> = ids.iter().map(|&id| forward.color(id)).collect();
        let second: Vec<_> = ids.iter().rev().map(|&id| backward.color(id)).collect();

        let second: Vec<_> = second.into_iter().rev().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_overflow_lookups_agree() {
        let shared = Arc::new(ColorPalette::new(256, 11));
        let ids: Vec<usize> = (300..400).collect();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let palette = Arc::clone(&shared);
                let mut order = ids.clone();
                order.rotate_left(worker * 13);
                if worker % 2 == 1 {
                    order.reverse();
                }
                thread::spawn(move || {
                    order
                        .into_iter()
                        .map(|id| (id, palette.color(id)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let reference = ColorPalette::new(256, 11);
        for handle in handles {
            for (id, color) in handle.join().unwrap() {
                assert_eq!(color, reference.color(id), "class {}", id);
            }
        }
        assert_eq!(shared.overflow.read().len(), ids.len());
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = ColorPalette::new(32, 1);
        let b = ColorPalette::new(32, 2);
        let differs = (1..32).any(|id| a.color(id) != b.color(id));
        assert!(differs);
    }

    #[test]
    fn test_classes_are_not_background_colored() {
        let palette = ColorPalette::new(256, 3);
        assert!((1..300).all(|id| palette.color(id) != BACKGROUND));
    }

    #[test]
    fn test_zero_size_still_has_background() {
        let palette = ColorPalette::new(0, 5);
        assert_eq!(palette.len(), 1);
        assert_eq!(palette.color(0), BACKGROUND);
        assert_ne!(palette.color(1), BACKGROUND);
    }
}
