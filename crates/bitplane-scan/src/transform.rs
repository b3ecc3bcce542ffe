use bitplane_bv::BitVec;
use bitplane_vec::{CodeValue, SortHint, SparseVector};

use crate::Scanner;

/// Gather batch size, in indices.
const REMAP_BUF: usize = 8192;

/// One-to-one set translation through a vector-as-function: the image of an
/// input index set under `i -> table[i]`.
///
/// When the table has no NULL plane, a stored zero and an absent position
/// look identical in the planes; [`attach`](Self::attach) caches the exact
/// maps-to-zero set so the two are not conflated during repeated remaps.
#[derive(Default)]
pub struct SetTransform {
    zero_idx: Option<BitVec>,
}

impl SetTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Precompute the maps-to-zero cache for `table`. Valid until the table
    /// is mutated.
    pub fn attach<V: CodeValue>(&mut self, table: &SparseVector<V>) {
        let mut z = BitVec::new();
        Scanner::new().find_zero(table, &mut z);
        self.zero_idx = Some(z);
    }

    pub fn detach(&mut self) {
        self.zero_idx = None;
    }

    /// Compute `{ table[i] : i in bv_in, i assigned }` into `bv_out`.
    /// Lookups go through the block-grouped gather path in sorted batches.
    pub fn remap<V: CodeValue>(
        &self,
        bv_in: &BitVec,
        table: &SparseVector<V>,
        bv_out: &mut BitVec,
    ) {
        *bv_out = BitVec::new();
        let size = table.size();
        if size == 0 {
            return;
        }
        let mut idx_buf: Vec<u64> = Vec::with_capacity(REMAP_BUF);
        let mut val_buf: Vec<V> = vec![V::default(); REMAP_BUF];
        let mut image: Vec<u64> = Vec::new();
        for i in bv_in.ones() {
            if i >= size {
                break;
            }
            if table.is_null(i) {
                continue;
            }
            idx_buf.push(i);
            if idx_buf.len() == REMAP_BUF {
                self.gather_into(table, &idx_buf, &mut val_buf, &mut image);
                idx_buf.clear();
            }
        }
        if !idx_buf.is_empty() {
            self.gather_into(table, &idx_buf, &mut val_buf, &mut image);
        }
        image.sort_unstable();
        image.dedup();
        bv_out.set_sorted(&image);
    }

    fn gather_into<V: CodeValue>(
        &self,
        table: &SparseVector<V>,
        idx: &[u64],
        val_buf: &mut [V],
        image: &mut Vec<u64>,
    ) {
        table.gather(&mut val_buf[..idx.len()], idx, SortHint::Sorted);
        for (k, v) in val_buf[..idx.len()].iter().enumerate() {
            let bits = v.to_u64();
            if bits == 0 && !table.is_nullable() {
                // Without a NULL plane, consult the zero cache when we have
                // one; an uncached in-range zero is taken at face value.
                if let Some(z) = &self.zero_idx {
                    if !z.test(idx[k]) {
                        continue;
                    }
                }
            }
            image.push(bits);
        }
    }
}
