//! CPU masks
//!
//! Fixed-size bitmaps over `MAX_CPUS` cores. `AtomicCpuMask` is the
//! lock-free variant used for the active mask and pending-preemption bits.

use core::sync::atomic::{AtomicU64, Ordering};

use super::types::{CpuNum, MAX_CPUS};

const WORD_BITS: usize = 64;
const WORDS: usize = MAX_CPUS / WORD_BITS;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask {
    bits: [u64; WORDS],
}

impl CpuMask {
    pub const fn empty() -> Self {
        Self { bits: [0; WORDS] }
    }

    pub const fn all() -> Self {
        Self { bits: [u64::MAX; WORDS] }
    }

    /// Mask with the first `n` cores set
    pub fn first_n(n: usize) -> Self {
        let mut mask = Self::empty();
        for cpu in 0..n.min(MAX_CPUS) {
            mask.set(cpu);
        }
        mask
    }

    /// Mask with only `cpu` set
    pub fn of(cpu: CpuNum) -> Self {
        let mut mask = Self::empty();
        mask.set(cpu);
        mask
    }

    #[inline]
    pub fn set(&mut self, cpu: CpuNum) {
        if cpu < MAX_CPUS {
            self.bits[cpu / WORD_BITS] |= 1u64 << (cpu % WORD_BITS);
        }
    }

    #[inline]
    pub fn clear(&mut self, cpu: CpuNum) {
        if cpu < MAX_CPUS {
            self.bits[cpu / WORD_BITS] &= !(1u64 << (cpu % WORD_BITS));
        }
    }

    #[inline]
    pub fn is_set(&self, cpu: CpuNum) -> bool {
        cpu < MAX_CPUS && self.bits[cpu / WORD_BITS] & (1u64 << (cpu % WORD_BITS)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn union(&self, other: &CpuMask) -> CpuMask {
        let mut out = *self;
        for (dst, src) in out.bits.iter_mut().zip(other.bits.iter()) {
            *dst |= *src;
        }
        out
    }

    pub fn intersection(&self, other: &CpuMask) -> CpuMask {
        let mut out = *self;
        for (dst, src) in out.bits.iter_mut().zip(other.bits.iter()) {
            *dst &= *src;
        }
        out
    }

    /// Lowest set core, if any
    pub fn first_set(&self) -> Option<CpuNum> {
        self.bits
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * WORD_BITS + w.trailing_zeros() as usize)
    }

    /// Set cores in ascending order
    pub fn iter_set(&self) -> impl Iterator<Item = CpuNum> + '_ {
        self.bits.iter().enumerate().flat_map(|(i, word)| {
            let mut w = *word;
            core::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }
}

impl core::fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter_set()).finish()
    }
}

/// Lock-free CPU mask
pub struct AtomicCpuMask {
    bits: [AtomicU64; WORDS],
}

impl AtomicCpuMask {
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self { bits: [ZERO; WORDS] }
    }

    pub fn load(&self) -> CpuMask {
        let mut mask = CpuMask::empty();
        for (dst, src) in mask.bits.iter_mut().zip(self.bits.iter()) {
            *dst = src.load(Ordering::Acquire);
        }
        mask
    }

    pub fn set(&self, cpu: CpuNum) {
        if cpu < MAX_CPUS {
            self.bits[cpu / WORD_BITS].fetch_or(1u64 << (cpu % WORD_BITS), Ordering::AcqRel);
        }
    }

    pub fn clear(&self, cpu: CpuNum) {
        if cpu < MAX_CPUS {
            self.bits[cpu / WORD_BITS].fetch_and(!(1u64 << (cpu % WORD_BITS)), Ordering::AcqRel);
        }
    }

    pub fn is_set(&self, cpu: CpuNum) -> bool {
        cpu < MAX_CPUS
            && self.bits[cpu / WORD_BITS].load(Ordering::Acquire) & (1u64 << (cpu % WORD_BITS)) != 0
    }

    /// OR `mask` in
    pub fn fetch_or(&self, mask: &CpuMask) {
        for (dst, src) in self.bits.iter().zip(mask.bits.iter()) {
            if *src != 0 {
                dst.fetch_or(*src, Ordering::AcqRel);
            }
        }
    }

    pub fn clear_all(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Release);
        }
    }
}

impl Default for AtomicCpuMask {
    fn default() -> Self {
        Self::new()
    }
}
