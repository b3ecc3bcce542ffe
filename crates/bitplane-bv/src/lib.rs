#![forbid(unsafe_code)]

//! Compressed bit-vector plane primitive.
//!
//! This crate provides the single bitmap type the sparse-vector engine is
//! built on: an unbounded bit space stored as 65 536-bit blocks, where each
//! block is either all-zero, all-one, or an explicit word array. The public
//! surface is the contract the higher layers call:
//! - point ops (`set`, `clear`, `test`) and bulk sorted set (`set_sorted`)
//! - bit-position `insert`/`erase` that shift the whole suffix
//! - in-place logical ops (`and_with`, `or_with`, `xor_with`, `sub_with`)
//! - counting, `rank`/`select`, and a block-prefix [`RsIndex`]
//! - a positionable set-bit enumerator (`ones_from`)
//! - rank renumbering (`compress`/`decompress`) for the rank-select layer
//! - a self-delimiting block codec with range-limited decode (see [`serial`])

mod ones;
mod rs_index;
pub mod serial;

pub use ones::Ones;
pub use rs_index::RsIndex;
pub use serial::PlaneCodecError;

/// log2 of the block size in bits. A block is the unit of uniform-run
/// compression and the super-block granularity the gather paths group by.
pub const BLOCK_SHIFT: u32 = 16;
/// Bits per block (65 536).
pub const BLOCK_BITS: u64 = 1 << BLOCK_SHIFT;
/// 64-bit words per block.
pub const BLOCK_WORDS: usize = (BLOCK_BITS / 64) as usize;

#[derive(Clone, PartialEq, Eq)]
enum Block {
    Zero,
    Full,
    Bits(Box<[u64; BLOCK_WORDS]>),
}

impl Block {
    /// Word at `wi`, regardless of representation.
    #[inline]
    fn word(&self, wi: usize) -> u64 {
        match self {
            Block::Zero => 0,
            Block::Full => u64::MAX,
            Block::Bits(w) => w[wi],
        }
    }

    fn count(&self) -> u64 {
        match self {
            Block::Zero => 0,
            Block::Full => BLOCK_BITS,
            Block::Bits(w) => w.iter().map(|x| x.count_ones() as u64).sum(),
        }
    }

    fn any(&self) -> bool {
        match self {
            Block::Zero => false,
            Block::Full => true,
            Block::Bits(w) => w.iter().any(|&x| x != 0),
        }
    }
}

#[inline]
fn split(pos: u64) -> (usize, usize, u32) {
    let bi = (pos >> BLOCK_SHIFT) as usize;
    let in_block = (pos & (BLOCK_BITS - 1)) as usize;
    (bi, in_block / 64, (in_block % 64) as u32)
}

/// Count set bits of `words` in the closed in-block bit range `[from, to]`.
fn count_words_range(words: &[u64; BLOCK_WORDS], from: usize, to: usize) -> u64 {
    let (fw, fb) = (from / 64, from % 64);
    let (tw, tb) = (to / 64, to % 64);
    let hi_mask = if tb == 63 { u64::MAX } else { (1u64 << (tb + 1)) - 1 };
    let lo_mask = !((1u64 << fb) - 1);
    if fw == tw {
        return (words[fw] & lo_mask & hi_mask).count_ones() as u64;
    }
    let mut n = (words[fw] & lo_mask).count_ones() as u64;
    for w in &words[fw + 1..tw] {
        n += w.count_ones() as u64;
    }
    n + (words[tw] & hi_mask).count_ones() as u64
}

/// A compressed bitmap over an unbounded index space.
///
/// Bits beyond the allocated blocks read as zero; setting a bit grows the
/// block list as needed. Equality compares bit content, not representation:
/// a trailing all-zero explicit block and no block at all are equal.
#[derive(Clone, Default)]
pub struct BitVec {
    blocks: Vec<Block>,
}

impl std::fmt::Debug for BitVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitVec")
            .field("blocks", &self.blocks.len())
            .field("ones", &self.count())
            .finish()
    }
}

impl PartialEq for BitVec {
    fn eq(&self, other: &Self) -> bool {
        self.find_first_mismatch(other).is_none()
    }
}

impl Eq for BitVec {}

impl BitVec {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Number of allocated blocks (content may still be all-zero).
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    fn block_bits_mut(&mut self, bi: usize) -> &mut [u64; BLOCK_WORDS] {
        if bi >= self.blocks.len() {
            self.blocks.resize_with(bi + 1, || Block::Zero);
        }
        let b = &mut self.blocks[bi];
        match b {
            Block::Zero => *b = Block::Bits(Box::new([0u64; BLOCK_WORDS])),
            Block::Full => *b = Block::Bits(Box::new([u64::MAX; BLOCK_WORDS])),
            Block::Bits(_) => {}
        }
        match b {
            Block::Bits(w) => w,
            _ => unreachable!(),
        }
    }

    /// Drop trailing blocks with no set bits.
    fn trim(&mut self) {
        while let Some(last) = self.blocks.last() {
            if last.any() {
                break;
            }
            self.blocks.pop();
        }
    }

    #[inline]
    pub fn test(&self, pos: u64) -> bool {
        let (bi, wi, bit) = split(pos);
        match self.blocks.get(bi) {
            None | Some(Block::Zero) => false,
            Some(Block::Full) => true,
            Some(Block::Bits(w)) => (w[wi] >> bit) & 1 == 1,
        }
    }

    #[inline]
    pub fn set(&mut self, pos: u64) {
        let (bi, wi, bit) = split(pos);
        if matches!(self.blocks.get(bi), Some(Block::Full)) {
            return;
        }
        self.block_bits_mut(bi)[wi] |= 1u64 << bit;
    }

    #[inline]
    pub fn clear(&mut self, pos: u64) {
        let (bi, wi, bit) = split(pos);
        match self.blocks.get(bi) {
            None | Some(Block::Zero) => return,
            _ => {}
        }
        self.block_bits_mut(bi)[wi] &= !(1u64 << bit);
    }

    #[inline]
    pub fn set_to(&mut self, pos: u64, value: bool) {
        if value {
            self.set(pos);
        } else {
            self.clear(pos);
        }
    }

    /// Bulk set of ascending positions. One block materialization per run of
    /// indices sharing a block, which is what makes transposition imports
    /// cheap compared to point sets.
    pub fn set_sorted(&mut self, positions: &[u64]) {
        debug_assert!(positions.windows(2).all(|w| w[0] <= w[1]));
        let mut i = 0;
        while i < positions.len() {
            let bi = (positions[i] >> BLOCK_SHIFT) as usize;
            if matches!(self.blocks.get(bi), Some(Block::Full)) {
                while i < positions.len() && (positions[i] >> BLOCK_SHIFT) as usize == bi {
                    i += 1;
                }
                continue;
            }
            let words = self.block_bits_mut(bi);
            while i < positions.len() && (positions[i] >> BLOCK_SHIFT) as usize == bi {
                let in_block = (positions[i] & (BLOCK_BITS - 1)) as usize;
                words[in_block / 64] |= 1u64 << (in_block % 64);
                i += 1;
            }
        }
    }

    pub fn any(&self) -> bool {
        self.blocks.iter().any(Block::any)
    }

    pub fn count(&self) -> u64 {
        self.blocks.iter().map(Block::count).sum()
    }

    /// Set-bit count over the closed range `[from, to]`.
    pub fn count_range(&self, from: u64, to: u64) -> u64 {
        if from > to {
            return 0;
        }
        let (bf, ..) = split(from);
        let (bt, ..) = split(to);
        let mut n = 0u64;
        for bi in bf..=bt.min(self.blocks.len().wrapping_sub(1)) {
            if bi >= self.blocks.len() {
                break;
            }
            let lo = if bi == bf { (from & (BLOCK_BITS - 1)) as usize } else { 0 };
            let hi = if bi == bt {
                (to & (BLOCK_BITS - 1)) as usize
            } else {
                (BLOCK_BITS - 1) as usize
            };
            n += match &self.blocks[bi] {
                Block::Zero => 0,
                Block::Full => (hi - lo + 1) as u64,
                Block::Bits(w) => count_words_range(w, lo, hi),
            };
        }
        n
    }

    /// Rank: set bits in `[0, pos]`.
    #[inline]
    pub fn rank(&self, pos: u64) -> u64 {
        self.count_range(0, pos)
    }

    /// Position of the `rank`-th set bit (1-based), if it exists.
    pub fn select(&self, rank: u64) -> Option<u64> {
        if rank == 0 {
            return None;
        }
        let mut remaining = rank;
        for (bi, block) in self.blocks.iter().enumerate() {
            let c = block.count();
            if remaining > c {
                remaining -= c;
                continue;
            }
            return Some(select_in_block(block, remaining, bi as u64));
        }
        None
    }

    pub fn find_first(&self) -> Option<u64> {
        self.ones().next()
    }

    pub fn find_last(&self) -> Option<u64> {
        for (bi, block) in self.blocks.iter().enumerate().rev() {
            match block {
                Block::Zero => {}
                Block::Full => return Some((bi as u64 + 1) * BLOCK_BITS - 1),
                Block::Bits(w) => {
                    for (wi, &word) in w.iter().enumerate().rev() {
                        if word != 0 {
                            let bit = 63 - word.leading_zeros() as u64;
                            return Some(bi as u64 * BLOCK_BITS + wi as u64 * 64 + bit);
                        }
                    }
                }
            }
        }
        None
    }

    /// First position where `self` and `other` differ, comparing the two as
    /// unbounded bit strings.
    pub fn find_first_mismatch(&self, other: &BitVec) -> Option<u64> {
        let nblocks = self.blocks.len().max(other.blocks.len());
        for bi in 0..nblocks {
            let a = self.blocks.get(bi);
            let b = other.blocks.get(bi);
            // Identical uniform forms cannot mismatch.
            match (a, b) {
                (None | Some(Block::Zero), None | Some(Block::Zero)) => continue,
                (Some(Block::Full), Some(Block::Full)) => continue,
                _ => {}
            }
            for wi in 0..BLOCK_WORDS {
                let wa = a.map_or(0, |x| x.word(wi));
                let wb = b.map_or(0, |x| x.word(wi));
                let x = wa ^ wb;
                if x != 0 {
                    return Some(
                        bi as u64 * BLOCK_BITS + wi as u64 * 64 + x.trailing_zeros() as u64,
                    );
                }
            }
        }
        None
    }

    pub fn ones(&self) -> Ones<'_> {
        Ones::new(self, 0)
    }

    /// Enumerate set bits at positions `>= pos`.
    pub fn ones_from(&self, pos: u64) -> Ones<'_> {
        Ones::new(self, pos)
    }

    /// Insert a bit at `pos`, shifting every bit at `>= pos` up by one.
    pub fn insert(&mut self, pos: u64, value: bool) {
        let (bi0, wi0, bit0) = split(pos);
        let nblocks = self.blocks.len();
        if bi0 >= nblocks {
            if value {
                self.set(pos);
            }
            return;
        }
        let mut carry = 0u64;
        for bi in bi0..nblocks {
            match &self.blocks[bi] {
                // A zero block shifts to a zero block unless a bit carries in.
                Block::Zero if carry == 0 && bi != bi0 => continue,
                Block::Full if carry == 1 && bi != bi0 => continue,
                _ => {}
            }
            let start_word = if bi == bi0 { wi0 } else { 0 };
            let words = self.block_bits_mut(bi);
            for wi in start_word..BLOCK_WORDS {
                let w = words[wi];
                let out = (w >> 63) & 1;
                if bi == bi0 && wi == wi0 {
                    let keep = (1u64 << bit0) - 1;
                    words[wi] = (w & keep) | ((w & !keep) << 1) | (carry << bit0);
                } else {
                    words[wi] = (w << 1) | carry;
                }
                carry = out;
            }
        }
        if carry == 1 {
            self.set(nblocks as u64 * BLOCK_BITS);
        }
        if value {
            self.set(pos);
        } else {
            self.clear(pos);
        }
    }

    /// Remove the bit at `pos`, shifting every bit at `> pos` down by one.
    pub fn erase(&mut self, pos: u64) {
        let (bi0, wi0, bit0) = split(pos);
        let nblocks = self.blocks.len();
        if bi0 >= nblocks {
            return;
        }
        for bi in bi0..nblocks {
            let next_in = if bi + 1 < nblocks {
                self.blocks[bi + 1].word(0) & 1
            } else {
                0
            };
            match &self.blocks[bi] {
                Block::Zero if next_in == 0 && bi != bi0 => continue,
                Block::Full if next_in == 1 && bi != bi0 => continue,
                _ => {}
            }
            let start_word = if bi == bi0 { wi0 } else { 0 };
            // Read the successor word before overwriting the current one;
            // forward iteration only ever writes behind the read cursor.
            for wi in start_word..BLOCK_WORDS {
                let incoming = if wi + 1 < BLOCK_WORDS {
                    self.blocks[bi].word(wi + 1) & 1
                } else {
                    next_in
                };
                let w = self.blocks[bi].word(wi);
                let new = if bi == bi0 && wi == wi0 {
                    let keep = (1u64 << bit0) - 1;
                    (w & keep) | ((w >> 1) & !keep) | (incoming << 63)
                } else {
                    (w >> 1) | (incoming << 63)
                };
                self.block_bits_mut(bi)[wi] = new;
            }
        }
        self.trim();
    }

    /// Clear every bit in the closed range `[from, to]`.
    pub fn clear_range(&mut self, from: u64, to: u64) {
        if from > to {
            return;
        }
        let (bf, ..) = split(from);
        let (bt, ..) = split(to);
        for bi in bf..=bt {
            if bi >= self.blocks.len() {
                break;
            }
            let lo = if bi == bf { (from & (BLOCK_BITS - 1)) as usize } else { 0 };
            let hi = if bi == bt {
                (to & (BLOCK_BITS - 1)) as usize
            } else {
                (BLOCK_BITS - 1) as usize
            };
            if lo == 0 && hi as u64 == BLOCK_BITS - 1 {
                self.blocks[bi] = Block::Zero;
                continue;
            }
            if !self.blocks[bi].any() {
                continue;
            }
            let words = self.block_bits_mut(bi);
            apply_range(words, lo, hi, |w, m| w & !m);
        }
        self.trim();
    }

    /// Set every bit in the closed range `[from, to]`.
    pub fn set_range(&mut self, from: u64, to: u64) {
        if from > to {
            return;
        }
        let (bf, ..) = split(from);
        let (bt, ..) = split(to);
        if bt >= self.blocks.len() {
            self.blocks.resize_with(bt + 1, || Block::Zero);
        }
        for bi in bf..=bt {
            let lo = if bi == bf { (from & (BLOCK_BITS - 1)) as usize } else { 0 };
            let hi = if bi == bt {
                (to & (BLOCK_BITS - 1)) as usize
            } else {
                (BLOCK_BITS - 1) as usize
            };
            if lo == 0 && hi as u64 == BLOCK_BITS - 1 {
                self.blocks[bi] = Block::Full;
                continue;
            }
            if matches!(self.blocks[bi], Block::Full) {
                continue;
            }
            let words = self.block_bits_mut(bi);
            apply_range(words, lo, hi, |w, m| w | m);
        }
    }

    pub fn and_with(&mut self, other: &BitVec) {
        for bi in 0..self.blocks.len() {
            match (&self.blocks[bi], other.blocks.get(bi)) {
                (Block::Zero, _) => {}
                (_, None | Some(Block::Zero)) => self.blocks[bi] = Block::Zero,
                (_, Some(Block::Full)) => {}
                (_, Some(Block::Bits(_))) => {
                    let words = self.block_bits_mut(bi);
                    let Some(Block::Bits(ow)) = other.blocks.get(bi) else {
                        unreachable!()
                    };
                    for (w, o) in words.iter_mut().zip(ow.iter()) {
                        *w &= o;
                    }
                }
            }
        }
        self.trim();
    }

    pub fn or_with(&mut self, other: &BitVec) {
        if other.blocks.len() > self.blocks.len() {
            self.blocks.resize_with(other.blocks.len(), || Block::Zero);
        }
        for bi in 0..other.blocks.len() {
            match (&self.blocks[bi], &other.blocks[bi]) {
                (_, Block::Zero) => {}
                (Block::Full, _) => {}
                (_, Block::Full) => self.blocks[bi] = Block::Full,
                (Block::Zero, Block::Bits(ow)) => {
                    self.blocks[bi] = Block::Bits(ow.clone());
                }
                (Block::Bits(_), Block::Bits(_)) => {
                    let words = self.block_bits_mut(bi);
                    let Some(Block::Bits(ow)) = other.blocks.get(bi) else {
                        unreachable!()
                    };
                    for (w, o) in words.iter_mut().zip(ow.iter()) {
                        *w |= o;
                    }
                }
            }
        }
    }

    pub fn xor_with(&mut self, other: &BitVec) {
        if other.blocks.len() > self.blocks.len() {
            self.blocks.resize_with(other.blocks.len(), || Block::Zero);
        }
        for bi in 0..other.blocks.len() {
            if matches!(other.blocks[bi], Block::Zero) {
                continue;
            }
            let words = self.block_bits_mut(bi);
            match &other.blocks[bi] {
                Block::Zero => unreachable!(),
                Block::Full => {
                    for w in words.iter_mut() {
                        *w = !*w;
                    }
                }
                Block::Bits(ow) => {
                    for (w, o) in words.iter_mut().zip(ow.iter()) {
                        *w ^= o;
                    }
                }
            }
        }
        self.trim();
    }

    /// Set subtraction: `self &= !other`.
    pub fn sub_with(&mut self, other: &BitVec) {
        for bi in 0..self.blocks.len() {
            match (&self.blocks[bi], other.blocks.get(bi)) {
                (Block::Zero, _) => {}
                (_, None | Some(Block::Zero)) => {}
                (_, Some(Block::Full)) => self.blocks[bi] = Block::Zero,
                (_, Some(Block::Bits(_))) => {
                    let words = self.block_bits_mut(bi);
                    let Some(Block::Bits(ow)) = other.blocks.get(bi) else {
                        unreachable!()
                    };
                    for (w, o) in words.iter_mut().zip(ow.iter()) {
                        *w &= !o;
                    }
                }
            }
        }
        self.trim();
    }

    /// Rank compression: bit `k` of the result is bit `p` of `self`, where
    /// `p` is the position of the `(k+1)`-th set bit of `mask`. Used to take
    /// a logical-coordinate bitmap into physical (rank) coordinates.
    pub fn compress(&self, mask: &BitVec) -> BitVec {
        let mut kept = Vec::new();
        for (k, pos) in mask.ones().enumerate() {
            if self.test(pos) {
                kept.push(k as u64);
            }
        }
        let mut out = BitVec::new();
        out.set_sorted(&kept);
        out
    }

    /// Inverse of [`compress`](Self::compress): bit `k` of `self` lands at
    /// the position of the `(k+1)`-th set bit of `mask`.
    pub fn decompress(&self, mask: &BitVec) -> BitVec {
        let mut kept = Vec::new();
        for (k, pos) in mask.ones().enumerate() {
            if self.test(k as u64) {
                kept.push(pos);
            }
        }
        let mut out = BitVec::new();
        out.set_sorted(&kept);
        out
    }

    /// Collapse explicit blocks back to their uniform forms where possible.
    pub fn optimize(&mut self) {
        for b in &mut self.blocks {
            if let Block::Bits(w) = b {
                if w.iter().all(|&x| x == 0) {
                    *b = Block::Zero;
                } else if w.iter().all(|&x| x == u64::MAX) {
                    *b = Block::Full;
                }
            }
        }
        self.trim();
    }

    /// Per-representation block tallies, for memory statistics.
    pub fn block_stats(&self) -> BlockStats {
        let mut s = BlockStats::default();
        for b in &self.blocks {
            match b {
                Block::Zero => s.zero_blocks += 1,
                Block::Full => s.full_blocks += 1,
                Block::Bits(_) => s.bit_blocks += 1,
            }
        }
        s
    }

    pub(crate) fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Borrow one block's decoded form. Gather-style callers group index
    /// lookups by block and match on this once per group instead of paying
    /// the block dispatch per bit.
    pub fn block_ref(&self, block_idx: usize) -> BlockRef<'_> {
        match self.blocks.get(block_idx) {
            None | Some(Block::Zero) => BlockRef::Zero,
            Some(Block::Full) => BlockRef::Full,
            Some(Block::Bits(w)) => BlockRef::Bits(&w[..]),
        }
    }

    pub(crate) fn push_raw_block(&mut self, b: Block) {
        self.blocks.push(b);
    }
}

/// A borrowed view of one block, see [`BitVec::block_ref`].
#[derive(Clone, Copy, Debug)]
pub enum BlockRef<'a> {
    Zero,
    Full,
    /// `BLOCK_WORDS` words, bit `i` of the block at word `i / 64`.
    Bits(&'a [u64]),
}

impl BlockRef<'_> {
    /// Test an in-block bit position.
    #[inline]
    pub fn test(&self, in_block: u64) -> bool {
        debug_assert!(in_block < BLOCK_BITS);
        match self {
            BlockRef::Zero => false,
            BlockRef::Full => true,
            BlockRef::Bits(w) => (w[(in_block / 64) as usize] >> (in_block % 64)) & 1 == 1,
        }
    }
}

/// Block tallies reported by [`BitVec::block_stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub zero_blocks: usize,
    pub full_blocks: usize,
    pub bit_blocks: usize,
}

impl BlockStats {
    /// Heap bytes held by explicit blocks.
    pub fn bit_block_bytes(&self) -> usize {
        self.bit_blocks * BLOCK_WORDS * 8
    }
}

fn apply_range(
    words: &mut [u64; BLOCK_WORDS],
    lo: usize,
    hi: usize,
    op: impl Fn(u64, u64) -> u64,
) {
    let (fw, fb) = (lo / 64, lo % 64);
    let (tw, tb) = (hi / 64, hi % 64);
    let hi_mask = if tb == 63 { u64::MAX } else { (1u64 << (tb + 1)) - 1 };
    let lo_mask = !((1u64 << fb) - 1);
    if fw == tw {
        words[fw] = op(words[fw], lo_mask & hi_mask);
        return;
    }
    words[fw] = op(words[fw], lo_mask);
    for w in &mut words[fw + 1..tw] {
        *w = op(*w, u64::MAX);
    }
    words[tw] = op(words[tw], hi_mask);
}

fn select_in_block(block: &Block, mut remaining: u64, bi: u64) -> u64 {
    debug_assert!(remaining >= 1 && remaining <= block.count());
    for wi in 0..BLOCK_WORDS {
        let w = block.word(wi);
        let c = w.count_ones() as u64;
        if remaining > c {
            remaining -= c;
            continue;
        }
        // remaining-th set bit of w.
        let mut word = w;
        for _ in 1..remaining {
            word &= word - 1;
        }
        return bi * BLOCK_BITS + wi as u64 * 64 + word.trailing_zeros() as u64;
    }
    unreachable!("select past block population");
}
