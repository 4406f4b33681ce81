//! Two-generation per-tile dirty bitmaps.
//!
//! The write side is mutated by the producer with atomic bitwise-OR only and
//! drained by the presentation task with an atomic exchange per word, so a
//! mark landing between the read and the clear of a drain cannot be lost.
//! The render side is plain memory owned by the presentation task; it is
//! cleared tile by tile as tiles are composited and transferred.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use bit_field::BitField;
use core::sync::atomic::{AtomicUsize, Ordering};

const WORD_BITS: usize = usize::BITS as usize;

fn word_count(tiles: usize) -> usize {
    (tiles + WORD_BITS - 1) / WORD_BITS
}

/// The write-side bitmap. Sized once for the worst-case tile count;
/// `reset` re-scopes it to the active mode's tile count.
pub struct DirtyTracker {
    words: Box<[AtomicUsize]>,
    tiles: AtomicUsize,
}

impl DirtyTracker {
    pub fn with_capacity(max_tiles: usize) -> Self {
        let words = (0..word_count(max_tiles))
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            words,
            tiles: AtomicUsize::new(0),
        }
    }

    /// Reinitializes for a mode with `tiles` tiles, discarding all marks.
    pub fn reset(&self, tiles: usize) {
        debug_assert!(word_count(tiles) <= self.words.len());
        self.tiles.store(tiles, Ordering::Release);
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.load(Ordering::Acquire)
    }

    /// Marks one tile dirty. Out-of-range indices are silently ignored.
    /// Release ordering pairs with the Acquire exchange in `drain_into`, so
    /// pixel bytes written before the mark are visible to the snapshot that
    /// consumes it.
    pub fn mark(&self, tile: usize) {
        if tile >= self.tiles.load(Ordering::Relaxed) {
            return;
        }
        self.words[tile / WORD_BITS].fetch_or(1 << (tile % WORD_BITS), Ordering::Release);
    }

    /// Transfers the write side into `render`, one atomic exchange per word,
    /// and returns the popcount of the words taken by this call. Bits still
    /// pending in `render` from an earlier drain are kept but not
    /// re-counted; an immediate second drain with no new marks returns zero.
    pub fn drain_into(&self, render: &mut RenderBitmap) -> usize {
        let words = word_count(self.tiles.load(Ordering::Acquire));
        let mut drained = 0;
        for (i, word) in self.words.iter().take(words).enumerate() {
            let taken = word.swap(0, Ordering::Acquire);
            if taken != 0 {
                render.words[i] |= taken;
                drained += taken.count_ones() as usize;
            }
        }
        drained
    }
}

/// The render-side bitmap, owned by the presentation task.
pub struct RenderBitmap {
    words: Vec<usize>,
    tiles: usize,
}

impl RenderBitmap {
    pub fn with_capacity(max_tiles: usize) -> Self {
        Self {
            words: vec![0; word_count(max_tiles)],
            tiles: 0,
        }
    }

    /// Reinitializes for a mode with `tiles` tiles, discarding pending bits.
    pub fn reset(&mut self, tiles: usize) {
        debug_assert!(word_count(tiles) <= self.words.len());
        self.tiles = tiles;
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn tile_count(&self) -> usize {
        self.tiles
    }

    /// Sets every bit; used on first frame, mode switch and palette change.
    /// Returns the total tile count.
    pub fn force_full(&mut self) -> usize {
        let full_words = self.tiles / WORD_BITS;
        for w in &mut self.words[..full_words] {
            *w = usize::MAX;
        }
        let tail = self.tiles % WORD_BITS;
        if tail != 0 {
            self.words[full_words] = (1 << tail) - 1;
        }
        self.tiles
    }

    pub fn is_set(&self, tile: usize) -> bool {
        tile < self.tiles && self.words[tile / WORD_BITS].get_bit(tile % WORD_BITS)
    }

    pub fn clear(&mut self, tile: usize) {
        if tile < self.tiles {
            self.words[tile / WORD_BITS].set_bit(tile % WORD_BITS, false);
        }
    }

    pub fn count(&self) -> usize {
        self.words
            .iter()
            .take(word_count(self.tiles))
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// First set tile index at or after `from`, if any. Lets the
    /// presentation loop walk and clear bits without holding an iterator
    /// borrow across the body.
    pub fn first_set_from(&self, from: usize) -> Option<usize> {
        if from >= self.tiles {
            return None;
        }
        let mut word_index = from / WORD_BITS;
        let mut word = self.words[word_index] & (usize::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                let tile = word_index * WORD_BITS + word.trailing_zeros() as usize;
                return (tile < self.tiles).then_some(tile);
            }
            word_index += 1;
            if word_index >= word_count(self.tiles) {
                return None;
            }
            word = self.words[word_index];
        }
    }

    /// Iterates set tile indices in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        let words = word_count(self.tiles);
        self.words
            .iter()
            .take(words)
            .enumerate()
            .flat_map(move |(i, w)| {
                let mut w = *w;
                core::iter::from_fn(move || {
                    if w == 0 {
                        return None;
                    }
                    let bit = w.trailing_zeros() as usize;
                    w &= w - 1;
                    Some(i * WORD_BITS + bit)
                })
            })
            .filter(move |t| *t < self.tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_survive_drain() {
        let tracker = DirtyTracker::with_capacity(144);
        tracker.reset(144);
        let mut render = RenderBitmap::with_capacity(144);
        render.reset(144);

        for t in [0, 19, 63, 64, 65, 143] {
            tracker.mark(t);
        }
        tracker.mark(144); // out of range, ignored
        assert_eq!(tracker.drain_into(&mut render), 6);
        assert_eq!(render.iter_set().collect::<Vec<_>>(), vec![0, 19, 63, 64, 65, 143]);

        // The write side is now empty: an immediate second drain reports
        // zero even though the render side still has the bits pending.
        assert_eq!(tracker.drain_into(&mut render), 0);
        assert_eq!(render.count(), 6);
    }

    #[test]
    fn draining_accumulates_into_pending_bits() {
        let tracker = DirtyTracker::with_capacity(144);
        tracker.reset(144);
        let mut render = RenderBitmap::with_capacity(144);
        render.reset(144);

        tracker.mark(5);
        assert_eq!(tracker.drain_into(&mut render), 1);
        tracker.mark(7);
        // Only the newly taken tile is counted, but tile 5 was never
        // consumed and must still be pending.
        assert_eq!(tracker.drain_into(&mut render), 1);
        assert!(render.is_set(5) && render.is_set(7));
        assert_eq!(render.count(), 2);
    }

    #[test]
    fn drains_after_force_full_report_only_new_marks() {
        let tracker = DirtyTracker::with_capacity(144);
        tracker.reset(144);
        let mut render = RenderBitmap::with_capacity(144);
        render.reset(144);

        // force_full itself reports the total; subsequent drains with no
        // producer writes report zero while leaving the bits pending.
        assert_eq!(render.force_full(), 144);
        assert!(!render.is_set(144));
        assert_eq!(tracker.drain_into(&mut render), 0);
        assert_eq!(tracker.drain_into(&mut render), 0);
        assert_eq!(render.count(), 144);

        tracker.mark(3);
        assert_eq!(tracker.drain_into(&mut render), 1);
        assert_eq!(render.count(), 144); // tile 3 was already pending
    }

    #[test]
    fn first_set_from_walks_across_words() {
        let mut render = RenderBitmap::with_capacity(144);
        render.reset(144);
        for t in [3, 63, 64, 130] {
            render.words[t / WORD_BITS].set_bit(t % WORD_BITS, true);
        }
        assert_eq!(render.first_set_from(0), Some(3));
        assert_eq!(render.first_set_from(3), Some(3));
        assert_eq!(render.first_set_from(4), Some(63));
        assert_eq!(render.first_set_from(64), Some(64));
        assert_eq!(render.first_set_from(65), Some(130));
        assert_eq!(render.first_set_from(131), None);
        assert_eq!(render.first_set_from(144), None);
    }

    #[test]
    fn reset_rescopes_to_smaller_grid() {
        let tracker = DirtyTracker::with_capacity(256);
        tracker.reset(256);
        tracker.mark(200);
        tracker.reset(100);
        let mut render = RenderBitmap::with_capacity(256);
        render.reset(100);
        assert_eq!(tracker.drain_into(&mut render), 0);
        assert_eq!(render.force_full(), 100);
        assert_eq!(render.count(), 100);
    }

    #[test]
    fn concurrent_marks_are_never_lost() {
        use std::sync::Arc;

        let tracker = Arc::new(DirtyTracker::with_capacity(512));
        tracker.reset(512);
        let mut render = RenderBitmap::with_capacity(512);
        render.reset(512);

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for t in (w * 128)..(w * 128 + 128) {
                        tracker.mark(t);
                    }
                })
            })
            .collect();

        // Drain concurrently with the writers; bits must accumulate in the
        // render side without loss.
        let mut total = 0;
        while total < 512 {
            total = tracker.drain_into(&mut render);
            std::thread::yield_now();
        }
        assert_eq!(render.count(), 512);
        assert!(render.iter_set().eq(0..512));
        for h in writers {
            h.join().unwrap();
        }
    }
}
