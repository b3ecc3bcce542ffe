use bitplane_bv::BLOCK_SHIFT;

use crate::{CodeValue, SparseVector, VectorError};

/// Decode buffer size for both iterator directions, in elements.
pub(crate) const ITER_BUF: usize = 8192;

/// Buffered read iterator over a [`SparseVector`].
///
/// Values are bulk-decoded [`ITER_BUF`] at a time; the buffer refills
/// lazily on the first read after a reposition, so `seek` itself is free.
pub struct SvIter<'a, V: CodeValue> {
    sv: &'a SparseVector<V>,
    pos: u64,
    buf: Vec<V>,
    /// Logical index of `buf[0]`; `u64::MAX` marks an unfilled buffer.
    buf_start: u64,
}

impl<'a, V: CodeValue> SvIter<'a, V> {
    pub(crate) fn new(sv: &'a SparseVector<V>) -> Self {
        Self {
            sv,
            pos: 0,
            buf: Vec::new(),
            buf_start: u64::MAX,
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn buffered(&mut self) -> Option<V> {
        if self.pos >= self.sv.size() {
            return None;
        }
        let in_buf = self.buf_start != u64::MAX
            && self.pos >= self.buf_start
            && self.pos < self.buf_start + self.buf.len() as u64;
        if !in_buf {
            let want = (self.sv.size() - self.pos).min(ITER_BUF as u64) as usize;
            self.buf.clear();
            self.buf.resize(want, V::default());
            self.sv.decode(&mut self.buf, self.pos, true);
            self.buf_start = self.pos;
        }
        Some(self.buf[(self.pos - self.buf_start) as usize])
    }

    /// Advance past a run of logical zeros without decoding it one element
    /// at a time: within the buffered window zeros are skipped in place,
    /// and once the window is exhausted the next window is decoded in bulk.
    pub fn skip_zero_values(&mut self) {
        while let Some(v) = self.buffered() {
            if v != V::default() {
                break;
            }
            self.pos += 1;
        }
    }
}

impl<V: CodeValue> Iterator for SvIter<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let v = self.buffered()?;
        self.pos += 1;
        Some(v)
    }
}

/// Buffered bulk appender for a [`SparseVector`].
///
/// Pushed values accumulate up to [`ITER_BUF`] elements and flush through
/// `import_back`. After a flush that crosses a storage-block boundary the
/// completed blocks are re-compressed, bounding peak memory during bulk
/// load. At most one live inserter per target vector.
///
/// [`finish`](Self::finish) is the reliable way to flush; dropping an
/// unfinished inserter flushes best-effort and swallows errors.
pub struct BackInserter<'a, V: CodeValue> {
    sv: &'a mut SparseVector<V>,
    buf: Vec<V>,
    /// Highest block index already passed to the optimizer.
    opt_block: u64,
}

impl<'a, V: CodeValue> BackInserter<'a, V> {
    pub(crate) fn new(sv: &'a mut SparseVector<V>) -> Self {
        let opt_block = sv.size() >> BLOCK_SHIFT;
        Self {
            sv,
            buf: Vec::with_capacity(ITER_BUF),
            opt_block,
        }
    }

    pub fn push(&mut self, v: V) -> Result<(), VectorError> {
        self.buf.push(v);
        if self.buf.len() == ITER_BUF {
            self.flush()?;
        }
        Ok(())
    }

    /// Append `count` unassigned elements. Requires a NULL-able target.
    pub fn push_null(&mut self, count: u64) -> Result<(), VectorError> {
        self.flush()?;
        self.sv.push_back_null(count);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), VectorError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.sv.import_back(&self.buf, true)?;
        self.buf.clear();
        let block = self.sv.size() >> BLOCK_SHIFT;
        if block > self.opt_block {
            self.sv.optimize();
            self.opt_block = block;
        }
        Ok(())
    }

    /// Flush and release the target.
    pub fn finish(mut self) -> Result<(), VectorError> {
        self.flush()
    }
}

impl<V: CodeValue> Drop for BackInserter<'_, V> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
