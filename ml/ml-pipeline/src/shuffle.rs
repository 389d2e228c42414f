//! Bounded-memory sliding-window shuffle.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Approximate shuffle over a fixed-size window.
///
/// Items are held until the window is full; each further push evicts a
/// uniformly chosen held item. An item therefore leaves at most
/// `capacity` positions before it entered, and memory stays bounded by the
/// window size. This is not a uniform permutation of the whole stream.
///
/// # Example
///
/// ```
/// use ml_pipeline::ShuffleWindow;
///
/// let mut window = ShuffleWindow::new(4, Some(1));
/// let mut out: Vec<u32> = (0..10).filter_map(|i| window.push(i)).collect();
/// out.extend(window.drain());
///
/// out.sort_unstable();
/// assert_eq!(out, (0..10).collect::<Vec<_>>());
/// ```
#[derive(Debug)]
pub struct ShuffleWindow<T> {
    items: Vec<T>,
    capacity: usize,
    rng: ChaCha8Rng,
}

impl<T> ShuffleWindow<T> {
    /// Creates a window holding up to `capacity` items.
    ///
    /// A capacity of zero passes items straight through.
    #[must_use]
    pub fn new(capacity: usize, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            items: Vec::with_capacity(capacity.saturating_add(1).min(1 << 16)),
            capacity,
            rng,
        }
    }

    /// Returns the window size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of held items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no items are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds an item, returning an evicted item once the window is full.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push(item);
        if self.items.len() > self.capacity {
            let i = self.rng.gen_range(0..self.items.len());
            Some(self.items.swap_remove(i))
        } else {
            None
        }
    }

    /// Removes every held item in random order.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.shuffle(&mut self.rng);
        std::mem::take(&mut self.items)
    }

    /// Discards every held item.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(capacity: usize, n: usize, seed: u64) -> Vec<usize> {
        let mut window = ShuffleWindow::new(capacity, Some(seed));
        let mut out: Vec<usize> = (0..n).filter_map(|i| window.push(i)).collect();
        out.extend(window.drain());
        out
    }

    #[test]
    fn window_is_a_permutation() {
        let mut out = run(16, 500, 3);
        out.sort_unstable();
        assert_eq!(out, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn window_bounds_displacement() {
        let capacity = 8;
        let out = run(capacity, 1000, 11);
        // Anything emitted before the final drain left no more than
        // `capacity` positions ahead of its input position
        for (position, &item) in out.iter().enumerate().take(1000 - capacity) {
            assert!(
                item <= position + capacity,
                "item {item} emitted at {position}"
            );
        }
    }

    #[test]
    fn window_actually_shuffles() {
        let out = run(32, 200, 5);
        assert_ne!(out, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn window_is_seeded() {
        assert_eq!(run(8, 100, 9), run(8, 100, 9));
        assert_ne!(run(8, 100, 9), run(8, 100, 10));
    }

    #[test]
    fn zero_capacity_passes_through() {
        assert_eq!(run(0, 10, 1), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn window_holds_at_most_capacity() {
        let mut window = ShuffleWindow::new(4, Some(0));
        for i in 0..100 {
            window.push(i);
            assert!(window.len() <= 4);
        }
        window.clear();
        assert!(window.is_empty());
    }
}
