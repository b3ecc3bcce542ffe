use crate::{BitVec, BLOCK_BITS, BLOCK_WORDS};

/// Enumerator over set bit positions, optionally started mid-vector.
///
/// Zero blocks are skipped wholesale, so iteration cost tracks the number of
/// set bits plus touched blocks rather than the bit-space size.
pub struct Ones<'a> {
    bv: &'a BitVec,
    block: usize,
    word: usize,
    cur: u64,
}

impl<'a> Ones<'a> {
    pub(crate) fn new(bv: &'a BitVec, pos: u64) -> Self {
        let bi = (pos >> crate::BLOCK_SHIFT) as usize;
        let in_block = (pos & (BLOCK_BITS - 1)) as usize;
        let (wi, bit) = (in_block / 64, (in_block % 64) as u32);
        let mut it = Ones {
            bv,
            block: bi,
            word: wi,
            cur: 0,
        };
        if bi < bv.blocks().len() {
            it.cur = bv.blocks()[bi].word(wi) & (u64::MAX << bit);
        }
        it
    }
}

impl Iterator for Ones<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if self.cur != 0 {
                let tz = self.cur.trailing_zeros() as u64;
                self.cur &= self.cur - 1;
                return Some(self.block as u64 * BLOCK_BITS + self.word as u64 * 64 + tz);
            }
            self.word += 1;
            if self.word >= BLOCK_WORDS {
                self.word = 0;
                self.block += 1;
                while self.block < self.bv.blocks().len() && !self.bv.blocks()[self.block].any() {
                    self.block += 1;
                }
            }
            if self.block >= self.bv.blocks().len() {
                return None;
            }
            self.cur = self.bv.blocks()[self.block].word(self.word);
        }
    }
}
