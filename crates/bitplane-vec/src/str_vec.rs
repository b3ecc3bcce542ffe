use std::cmp::Ordering;

use bitplane_bv::BitVec;

use crate::access::{PlaneAccess, PlaneStore};
use crate::matrix::BitMatrix;
use crate::{Nulls, VectorError};

/// Default maximum string length in octets.
pub const DEFAULT_MAX_LEN: usize = 8;

/// Per-column octet remap table.
///
/// Column `c` maps the octet alphabet actually used at string position `c`
/// onto a dense 1-based code range; 0 stays reserved for the terminator.
/// Codes are assigned in ascending octet order, so remapping preserves
/// lexicographic comparison of stored strings.
#[derive(Clone, PartialEq, Eq)]
pub struct RemapTable {
    /// `fwd[c][octet]` = code, 0 when the octet is not in column `c`'s
    /// alphabet.
    fwd: Vec<[u8; 256]>,
    /// `inv[c][code]` = octet.
    inv: Vec<[u8; 256]>,
}

impl std::fmt::Debug for RemapTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemapTable")
            .field("columns", &self.fwd.len())
            .finish()
    }
}

impl RemapTable {
    /// Build from per-column alphabets (sets of octets observed at each
    /// string position).
    fn from_alphabets(alphabets: &[[bool; 256]]) -> Self {
        let mut fwd = Vec::with_capacity(alphabets.len());
        let mut inv = Vec::with_capacity(alphabets.len());
        for alpha in alphabets {
            let mut f = [0u8; 256];
            let mut i = [0u8; 256];
            let mut code = 0u8;
            for octet in 1..256usize {
                if alpha[octet] {
                    code += 1;
                    f[octet] = code;
                    i[code as usize] = octet as u8;
                }
            }
            fwd.push(f);
            inv.push(i);
        }
        Self { fwd, inv }
    }

    pub fn columns(&self) -> usize {
        self.fwd.len()
    }

    /// Code for `octet` at column `col`, or `None` when the octet never
    /// occurs there.
    pub fn map(&self, col: usize, octet: u8) -> Option<u8> {
        if octet == 0 {
            return Some(0);
        }
        match self.fwd.get(col) {
            Some(f) => {
                let code = f[octet as usize];
                (code != 0).then_some(code)
            }
            None => None,
        }
    }

    /// Octet for `code` at column `col`.
    pub fn unmap(&self, col: usize, code: u8) -> u8 {
        if code == 0 {
            return 0;
        }
        self.inv[col][code as usize]
    }

    /// Raw wire form: each column's 256-byte forward map, in order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.fwd.len() * 256);
        for f in &self.fwd {
            out.extend_from_slice(f);
        }
        out
    }

    /// Parse the wire form; the length must be a nonzero multiple of 256.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.is_empty() || buf.len() % 256 != 0 {
            return None;
        }
        let mut fwd = Vec::with_capacity(buf.len() / 256);
        let mut inv = Vec::with_capacity(buf.len() / 256);
        for chunk in buf.chunks_exact(256) {
            let mut f = [0u8; 256];
            f.copy_from_slice(chunk);
            let mut i = [0u8; 256];
            for (octet, &code) in f.iter().enumerate() {
                if code != 0 {
                    i[code as usize] = octet as u8;
                }
            }
            fwd.push(f);
            inv.push(i);
        }
        Some(Self { fwd, inv })
    }
}

/// Octet-transposed vector of byte strings.
///
/// A string occupies one logical index; octet `o` of each string lives in
/// plane slots `[o*8, o*8+8)`, terminator octets read 0. Strings must not
/// contain NUL and are truncated at `max_len` octets.
#[derive(Clone, Debug)]
pub struct StrVector {
    bmatr: BitMatrix,
    max_len: usize,
    remap: Option<RemapTable>,
}

impl Default for StrVector {
    fn default() -> Self {
        Self::new(Nulls::Off)
    }
}

impl StrVector {
    pub fn new(nulls: Nulls) -> Self {
        Self::with_max_len(DEFAULT_MAX_LEN, nulls)
    }

    pub fn with_max_len(max_len: usize, nulls: Nulls) -> Self {
        Self {
            bmatr: BitMatrix::new(max_len * 8, nulls),
            max_len,
            remap: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.bmatr.size
    }

    pub fn is_empty(&self) -> bool {
        self.bmatr.size == 0
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn is_nullable(&self) -> bool {
        self.bmatr.is_nullable()
    }

    pub fn is_null(&self, idx: u64) -> bool {
        match &self.bmatr.null_plane {
            Some(np) => !np.test(idx),
            None => false,
        }
    }

    pub fn is_remapped(&self) -> bool {
        self.remap.is_some()
    }

    pub fn remap_table(&self) -> Option<&RemapTable> {
        self.remap.as_ref()
    }

    /// Install a decoded remap table without touching plane content. The
    /// codec uses this; planes are expected to already hold remapped codes.
    pub fn install_remap_table(&mut self, table: RemapTable) {
        self.remap = Some(table);
    }

    /// Translate a query into stored coordinates: identity without a remap
    /// table, else per-column mapping. `None` means some octet never occurs
    /// at that column, so no stored string can equal the query.
    pub fn translate(&self, s: &[u8]) -> Option<Vec<u8>> {
        match &self.remap {
            None => Some(s.to_vec()),
            Some(t) => {
                let mut out = Vec::with_capacity(s.len());
                for (col, &octet) in s.iter().enumerate() {
                    out.push(t.map(col, octet)?);
                }
                Some(out)
            }
        }
    }

    pub fn set_str(&mut self, idx: u64, s: &[u8]) -> Result<(), VectorError> {
        let coded = self
            .translate(s)
            .ok_or(VectorError::NotFound { index: idx })?;
        if idx >= self.bmatr.size {
            self.bmatr.size = idx + 1;
        }
        let n = coded.len().min(self.max_len);
        debug_assert!(
            coded[..n].iter().all(|&c| c != 0),
            "interior NUL octet"
        );
        // Octet columns 0..8 fit one accumulator word; set_bits also clears
        // every plane above the new terminator, including high columns.
        let low_n = n.min(8);
        let mut low = 0u64;
        for (o, &code) in coded[..low_n].iter().enumerate() {
            low |= (code as u64) << (o * 8);
        }
        self.bmatr.set_bits(idx, low, low_n * 8);
        if n > 8 {
            for (o, &code) in coded[8..n].iter().enumerate() {
                for bit in 0..8 {
                    if (code >> bit) & 1 == 1 {
                        self.bmatr.plane_mut((8 + o) * 8 + bit).set(idx);
                    }
                }
            }
            self.bmatr.cover(n * 8);
        }
        if let Some(np) = &mut self.bmatr.null_plane {
            np.set(idx);
        }
        Ok(())
    }

    pub fn push_back_str(&mut self, s: &[u8]) -> Result<(), VectorError> {
        self.set_str(self.bmatr.size, s)
    }

    /// Stored string at `idx`, unmapped back to source octets.
    pub fn get_str(&self, idx: u64) -> Vec<u8> {
        let mut out = Vec::new();
        for o in 0..self.max_len {
            let code = self.octet_code(idx, o);
            if code == 0 {
                break;
            }
            let octet = match &self.remap {
                Some(t) => t.unmap(o, code),
                None => code,
            };
            out.push(octet);
        }
        out
    }

    /// Raw stored code at octet column `o` (remapped space when a table is
    /// installed).
    pub(crate) fn octet_code(&self, idx: u64, o: usize) -> u8 {
        let base = o * 8;
        if base >= self.bmatr.effective {
            return 0;
        }
        let mut code = 0u8;
        for bit in 0..8 {
            if let Some(p) = self.bmatr.plane(base + bit) {
                if p.test(idx) {
                    code |= 1 << bit;
                }
            }
        }
        code
    }

    /// Lexicographic comparison of the stored string against `s`.
    pub fn compare_str(&self, idx: u64, s: &[u8]) -> Ordering {
        self.get_str(idx).as_slice().cmp(s)
    }

    /// Build a remap table from current content and rewrite every string in
    /// remapped coordinates. Code assignment is order-preserving, so sorted
    /// vectors stay sorted.
    pub fn remap_optimize(&mut self) {
        debug_assert!(self.remap.is_none(), "already remapped");
        let mut alphabets = vec![[false; 256]; self.max_len];
        for idx in 0..self.bmatr.size {
            for (o, alpha) in alphabets.iter_mut().enumerate() {
                let code = self.octet_code(idx, o);
                if code == 0 {
                    break;
                }
                alpha[code as usize] = true;
            }
        }
        let table = RemapTable::from_alphabets(&alphabets);
        let originals: Vec<Option<Vec<u8>>> = (0..self.bmatr.size)
            .map(|idx| (!self.is_null(idx)).then(|| self.get_str(idx)))
            .collect();
        self.remap = Some(table);
        for (idx, s) in originals.into_iter().enumerate() {
            if let Some(s) = s {
                // Every octet is in its column alphabet by construction.
                let _ = self.set_str(idx as u64, &s);
            }
        }
        self.bmatr.optimize();
    }

    pub fn optimize(&mut self) {
        self.bmatr.optimize();
    }
}

impl PlaneAccess for StrVector {
    fn plane_count(&self) -> usize {
        self.bmatr.rows() + usize::from(self.bmatr.is_nullable())
    }

    fn plane(&self, j: usize) -> Option<&BitVec> {
        if j < self.bmatr.rows() {
            self.bmatr.plane(j)
        } else {
            self.bmatr.null_plane.as_ref()
        }
    }

    fn size(&self) -> u64 {
        self.bmatr.size
    }

    fn is_nullable(&self) -> bool {
        self.bmatr.is_nullable()
    }
}

impl PlaneStore for StrVector {
    fn install_plane(&mut self, j: usize, plane: BitVec) {
        if j < self.bmatr.rows() {
            self.bmatr.planes[j] = Some(plane);
        } else {
            debug_assert!(self.bmatr.is_nullable());
            self.bmatr.null_plane = Some(plane);
        }
    }

    fn free_plane(&mut self, j: usize) {
        if j < self.bmatr.rows() {
            self.bmatr.planes[j] = None;
        }
    }

    fn set_size(&mut self, size: u64) {
        self.bmatr.size = size;
    }

    fn finalize(&mut self) {
        self.bmatr.recompute_effective();
    }
}
