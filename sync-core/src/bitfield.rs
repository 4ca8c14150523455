//! Sparse paged bitfield.
//!
//! Block indices routinely exceed 32 bits, and most bitfields describe a
//! small window of a very large index space. Bits live in fixed-size pages
//! that are allocated the first time a bit inside them is set to `true`, so
//! an empty bitfield costs nothing regardless of the index range it covers.
//!
//! Bits are addressed least-significant first within 32-bit words: bit `i`
//! is bit `i % 32` of word `i / 32`.

use std::collections::BTreeMap;
use std::fmt;

/// Number of bits in one word.
pub const BITS_PER_WORD: u64 = 32;

/// Number of words in one page.
pub const WORDS_PER_PAGE: usize = 1024;

/// Number of bits in one page.
pub const BITS_PER_PAGE: u64 = BITS_PER_WORD * WORDS_PER_PAGE as u64;

type Page = Box<[u32; WORDS_PER_PAGE]>;

/// A conceptually infinite boolean array, `false` everywhere by default.
#[derive(Clone, Default)]
pub struct Bitfield {
    pages: BTreeMap<u64, Page>,
}

impl Bitfield {
    /// Create an empty bitfield.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bitfield from words, the first of which covers block `start`.
    ///
    /// When `start` is not word aligned the words are applied bit by bit.
    pub fn from_words(start: u64, words: &[u32]) -> Self {
        let mut bitfield = Self::new();
        bitfield.insert_words(start, words);
        bitfield
    }

    /// Set every bit covered by `words`, starting at block `start`.
    ///
    /// Bits outside the covered range are untouched; bits inside it take the
    /// value from `words` (including `false`).
    pub fn insert_words(&mut self, start: u64, words: &[u32]) {
        if start % BITS_PER_WORD == 0 {
            let first_word = start / BITS_PER_WORD;
            for (offset, &word) in words.iter().enumerate() {
                self.write_word(first_word + offset as u64, u32::MAX, false);
                self.write_word(first_word + offset as u64, word, true);
            }
            return;
        }
        for (offset, &word) in words.iter().enumerate() {
            for bit in 0..BITS_PER_WORD {
                let index = start + offset as u64 * BITS_PER_WORD + bit;
                self.set(index, word & (1 << bit) != 0);
            }
        }
    }

    /// Get the bit at `index`.
    pub fn get(&self, index: u64) -> bool {
        self.get_word(index / BITS_PER_WORD) & (1 << (index % BITS_PER_WORD)) != 0
    }

    /// Set the bit at `index`. Returns whether the bit changed.
    pub fn set(&mut self, index: u64, value: bool) -> bool {
        let before = self.get(index);
        if before != value {
            self.write_word(index / BITS_PER_WORD, 1 << (index % BITS_PER_WORD), value);
        }
        before != value
    }

    /// Set every bit in `[start, start + length)` to `value`.
    ///
    /// Clearing a range never allocates; setting a range allocates only the
    /// pages it touches.
    pub fn set_range(&mut self, start: u64, length: u64, value: bool) {
        let end = start.saturating_add(length);
        let mut index = start;
        while index < end {
            let page = index / BITS_PER_PAGE;
            let page_end = (page + 1).saturating_mul(BITS_PER_PAGE).min(end);
            if !value && !self.pages.contains_key(&page) {
                index = page_end;
                continue;
            }
            while index < page_end {
                let bit = index % BITS_PER_WORD;
                let span = (BITS_PER_WORD - bit).min(page_end - index);
                self.write_word(index / BITS_PER_WORD, span_mask(bit, span), value);
                index += span;
            }
        }
    }

    /// Get the 32 bits covering blocks `[word * 32, word * 32 + 32)`.
    pub fn get_word(&self, word: u64) -> u32 {
        let page = word / WORDS_PER_PAGE as u64;
        let offset = (word % WORDS_PER_PAGE as u64) as usize;
        self.pages.get(&page).map_or(0, |p| p[offset])
    }

    /// Find the first `true` bit at or after `from`.
    pub fn first_set(&self, from: u64) -> Option<u64> {
        let from_page = from / BITS_PER_PAGE;
        for (&page, words) in self.pages.range(from_page..) {
            let page_start = page * BITS_PER_PAGE;
            let (first_word, first_bit) = if page == from_page {
                let within = from - page_start;
                ((within / BITS_PER_WORD) as usize, within % BITS_PER_WORD)
            } else {
                (0, 0)
            };
            for (offset, &word) in words.iter().enumerate().skip(first_word) {
                let masked = if offset == first_word {
                    word & (u32::MAX << first_bit)
                } else {
                    word
                };
                if masked != 0 {
                    return Some(
                        page_start
                            + offset as u64 * BITS_PER_WORD
                            + u64::from(masked.trailing_zeros()),
                    );
                }
            }
        }
        None
    }

    /// Find the first `false` bit at or after `from`.
    ///
    /// Always succeeds: only finitely many bits can be set.
    pub fn first_unset(&self, from: u64) -> u64 {
        let mut index = from;
        loop {
            let page = index / BITS_PER_PAGE;
            let Some(words) = self.pages.get(&page) else {
                return index;
            };
            let page_start = page * BITS_PER_PAGE;
            let within = index - page_start;
            let first_word = (within / BITS_PER_WORD) as usize;
            let first_bit = within % BITS_PER_WORD;
            for (offset, &word) in words.iter().enumerate().skip(first_word) {
                let mut inverted = !word;
                if offset == first_word {
                    inverted &= u32::MAX << first_bit;
                }
                if inverted != 0 {
                    return page_start
                        + offset as u64 * BITS_PER_WORD
                        + u64::from(inverted.trailing_zeros());
                }
            }
            index = page_start.saturating_add(BITS_PER_PAGE);
            if index == u64::MAX {
                return index;
            }
        }
    }

    /// Count the `true` bits in `[start, start + length)`.
    pub fn count_ones(&self, start: u64, length: u64) -> u64 {
        let end = start.saturating_add(length);
        let mut index = start;
        let mut count = 0;
        while index < end {
            let page = index / BITS_PER_PAGE;
            let page_end = (page + 1).saturating_mul(BITS_PER_PAGE).min(end);
            if !self.pages.contains_key(&page) {
                index = page_end;
                continue;
            }
            while index < page_end {
                let bit = index % BITS_PER_WORD;
                let span = (BITS_PER_WORD - bit).min(page_end - index);
                let word = self.get_word(index / BITS_PER_WORD);
                count += u64::from((word & span_mask(bit, span)).count_ones());
                index += span;
            }
        }
        count
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.pages.values().all(|words| words.iter().all(|&w| w == 0))
    }

    /// Number of allocated pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn write_word(&mut self, word: u64, mask: u32, value: bool) {
        let page = word / WORDS_PER_PAGE as u64;
        let offset = (word % WORDS_PER_PAGE as u64) as usize;
        if value {
            let words = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([0; WORDS_PER_PAGE]));
            words[offset] |= mask;
        } else if let Some(words) = self.pages.get_mut(&page) {
            words[offset] &= !mask;
        }
    }
}

/// Mask of `span` bits starting at `bit` within a word.
fn span_mask(bit: u64, span: u64) -> u32 {
    if span >= BITS_PER_WORD {
        u32::MAX
    } else {
        ((1u32 << span) - 1) << bit
    }
}

impl PartialEq for Bitfield {
    fn eq(&self, other: &Self) -> bool {
        let zero = [0u32; WORDS_PER_PAGE];
        let pages = self.pages.keys().chain(other.pages.keys());
        pages.into_iter().all(|page| {
            let a = self.pages.get(page).map_or(&zero, |p| &**p);
            let b = other.pages.get(page).map_or(&zero, |p| &**p);
            a == b
        })
    }
}

impl Eq for Bitfield {}

impl fmt::Debug for Bitfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ones: u64 = self
            .pages
            .values()
            .flat_map(|words| words.iter())
            .map(|w| u64::from(w.count_ones()))
            .sum();
        f.debug_struct("Bitfield")
            .field("pages", &self.pages.len())
            .field("ones", &ones)
            .finish()
    }
}
