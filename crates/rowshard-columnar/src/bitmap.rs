#![forbid(unsafe_code)]

use std::ops::Range;

/// A compact bit vector used for validity masks and boolean columns.
///
/// Bits are stored little-endian within each `u64` word:
/// - bit 0 is the LSB of word 0
/// - bit 63 is the MSB of word 0
///
/// Bits past `len` in the last word are always zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl BitVec {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
            ones: 0,
        }
    }

    pub fn with_capacity_bits(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(word_count(bits)),
            len: 0,
            ones: 0,
        }
    }

    pub fn with_len_all_true(bits: usize) -> Self {
        if bits == 0 {
            return Self::new();
        }

        let mut words = vec![u64::MAX; word_count(bits)];
        let rem = bits % 64;
        if rem != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << rem) - 1;
            }
        }

        Self {
            words,
            len: bits,
            ones: bits,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        let bit = self.len % 64;
        if bit == 0 {
            self.words.push(0);
        }

        if value {
            let word = self.len / 64;
            self.words[word] |= 1u64 << bit;
            self.ones += 1;
        }

        self.len += 1;
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let word = self.words[index / 64];
        ((word >> (index % 64)) & 1) == 1
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn count_zeros(&self) -> usize {
        self.len - self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    /// Size of the backing word buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    /// Build a new vector where bit `i` is `self[indices[i]]`.
    pub fn gather(&self, indices: &[usize]) -> BitVec {
        let mut out = BitVec::with_capacity_bits(indices.len());
        for &idx in indices {
            out.push(self.get(idx));
        }
        out
    }

    /// Copy a contiguous run of bits into a new vector.
    pub fn slice(&self, range: Range<usize>) -> BitVec {
        debug_assert!(range.end <= self.len, "BitVec slice out of bounds");
        let mut out = BitVec::with_capacity_bits(range.len());
        for idx in range {
            out.push(self.get(idx));
        }
        out
    }

    /// Iterate over all bits in order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |idx| self.get(idx))
    }

    /// Reconstruct a [`BitVec`] from a raw word buffer and a bit length.
    ///
    /// Bits past `len` are cleared so equality and popcounts stay well defined.
    pub fn from_words(mut words: Vec<u64>, len: usize) -> Self {
        words.resize(word_count(len), 0);
        let rem_bits = len % 64;
        if rem_bits != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << rem_bits) - 1;
            }
        }

        let ones = words.iter().map(|w| w.count_ones() as usize).sum();
        Self { words, len, ones }
    }
}

impl Default for BitVec {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<bool> for BitVec {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut out = BitVec::with_capacity_bits(iter.size_hint().0);
        for bit in iter {
            out.push(bit);
        }
        out
    }
}

fn word_count(bits: usize) -> usize {
    (bits + 63) / 64
}
