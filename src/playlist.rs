use std::collections::HashSet;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::SlideshowError;

/// Cyclic list of image paths shared by every surface.
///
/// The cursor always stays in `[0, len)`; it wraps to 0 after the last entry.
#[derive(Debug)]
pub struct Playlist {
    entries: Vec<PathBuf>,
    cursor: usize,
    shuffle: bool,
    rng: StdRng,
}

impl Playlist {
    /// Builds a playlist seeded from the OS. When `shuffle` is set the entries
    /// are permuted once up front.
    pub fn new(entries: Vec<PathBuf>, shuffle: bool) -> Self {
        Self::with_rng(entries, shuffle, StdRng::from_os_rng())
    }

    pub fn with_seed(entries: Vec<PathBuf>, shuffle: bool, seed: u64) -> Self {
        Self::with_rng(entries, shuffle, StdRng::seed_from_u64(seed))
    }

    fn with_rng(entries: Vec<PathBuf>, shuffle: bool, rng: StdRng) -> Self {
        let mut playlist = Self {
            entries,
            cursor: 0,
            shuffle,
            rng,
        };
        if shuffle {
            playlist.shuffle();
        }
        info!(
            entries = playlist.entries.len(),
            shuffle, "playlist ready"
        );
        playlist
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of different paths; a folder listed twice yields duplicates.
    pub fn distinct_len(&self) -> usize {
        self.entries.iter().collect::<HashSet<_>>().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Returns the entry under the cursor and advances the cursor.
    pub fn next(&mut self) -> Result<PathBuf, SlideshowError> {
        let Some(path) = self.entries.get(self.cursor).cloned() else {
            return Err(SlideshowError::EmptyPlaylist);
        };
        self.cursor = (self.cursor + 1) % self.entries.len();
        Ok(path)
    }

    /// Uniformly permutes all entries and rewinds the cursor.
    pub fn shuffle(&mut self) {
        self.entries.shuffle(&mut self.rng);
        self.cursor = 0;
        debug!(entries = self.entries.len(), "playlist shuffled");
    }

    /// Lists the next `n` entries `next()` would return, without advancing.
    pub fn peek_order(&self, n: usize) -> Vec<PathBuf> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        (0..n)
            .map(|i| self.entries[(self.cursor + i) % self.entries.len()].clone())
            .collect()
    }

    /// Swaps in a fresh scan result. The cursor rewinds and the shuffle
    /// setting is applied again.
    pub fn replace(&mut self, entries: Vec<PathBuf>) {
        self.entries = entries;
        self.cursor = 0;
        if self.shuffle {
            self.shuffle();
        }
        info!(entries = self.entries.len(), "playlist rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn cycles_in_cursor_order() {
        let mut playlist = Playlist::with_seed(paths(&["a", "b", "c"]), false, 0);
        let seen: Vec<_> = (0..7).map(|_| playlist.next().unwrap()).collect();
        assert_eq!(seen, paths(&["a", "b", "c", "a", "b", "c", "a"]));
        assert_eq!(playlist.cursor(), 1);
    }

    #[test]
    fn empty_playlist_reports_error() {
        let mut playlist = Playlist::with_seed(Vec::new(), true, 0);
        assert!(matches!(
            playlist.next(),
            Err(SlideshowError::EmptyPlaylist)
        ));
        assert!(playlist.peek_order(3).is_empty());
    }

    #[test]
    fn shuffled_cycle_visits_everything_once() {
        let names: Vec<String> = (0..25).map(|i| format!("img{i}.jpg")).collect();
        let entries: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
        let mut playlist = Playlist::with_seed(entries.clone(), true, 42);
        for _ in 0..3 {
            let cycle: HashSet<_> = (0..entries.len())
                .map(|_| playlist.next().unwrap())
                .collect();
            assert_eq!(cycle.len(), entries.len());
        }
    }

    #[test]
    fn same_seed_same_order() {
        let entries = paths(&["a", "b", "c", "d", "e", "f"]);
        let a = Playlist::with_seed(entries.clone(), true, 9);
        let b = Playlist::with_seed(entries, true, 9);
        assert_eq!(a.entries(), b.entries());
    }

    #[test]
    fn shuffle_rewinds_cursor() {
        let mut playlist = Playlist::with_seed(paths(&["a", "b", "c"]), false, 1);
        playlist.next().unwrap();
        playlist.next().unwrap();
        playlist.shuffle();
        assert_eq!(playlist.cursor(), 0);
        assert_eq!(playlist.len(), 3);
    }

    #[test]
    fn peek_order_wraps_without_advancing() {
        let mut playlist = Playlist::with_seed(paths(&["a", "b"]), false, 0);
        playlist.next().unwrap();
        assert_eq!(playlist.peek_order(3), paths(&["b", "a", "b"]));
        assert_eq!(playlist.cursor(), 1);
    }

    #[test]
    fn replace_resets_cursor() {
        let mut playlist = Playlist::with_seed(paths(&["a", "b"]), false, 0);
        playlist.next().unwrap();
        playlist.replace(paths(&["x", "y", "z"]));
        assert_eq!(playlist.cursor(), 0);
        assert_eq!(playlist.next().unwrap(), PathBuf::from("x"));
    }

    #[test]
    fn distinct_len_ignores_duplicates() {
        let playlist = Playlist::with_seed(paths(&["a", "b", "a"]), false, 0);
        assert_eq!(playlist.len(), 3);
        assert_eq!(playlist.distinct_len(), 2);
    }
}
