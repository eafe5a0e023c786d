//! Fixed-capacity circular buffer with chronological reads

use super::DspError;

/// Circular buffer keeping the last `size` inserted elements.
///
/// Reads are always chronological: index 0 is the oldest of the retained
/// elements and index `size - 1` the newest. Slots that were never written
/// hold the fill value given at construction.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    /// Slot the next insert lands in, which is also the oldest element
    write_pos: usize,
    written: u64,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer of `size` slots pre-filled with `fill`.
    ///
    /// A zero size is promoted to one slot so every insert stays O(1).
    pub fn new(size: usize, fill: T) -> Self {
        Self {
            data: vec![fill; size.max(1)],
            write_pos: 0,
            written: 0,
        }
    }

    /// Capacity in elements
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Total number of logical inserts since construction
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Insert one element, overwriting the oldest.
    pub fn insert(&mut self, elem: T) {
        self.data[self.write_pos] = elem;
        self.write_pos = (self.write_pos + 1) % self.data.len();
        self.written += 1;
    }

    /// Insert a batch. Equivalent to calling [`insert`](Self::insert) for
    /// every element in order, including the `written` counter.
    pub fn insert_slice(&mut self, elems: &[T]) {
        let size = self.data.len();
        let skipped = elems.len().saturating_sub(size);
        let tail = &elems[skipped..];

        // Skipped elements would have been overwritten anyway, but they still
        // moved the cursor.
        let mut pos = (self.write_pos + skipped % size) % size;
        let first = tail.len().min(size - pos);
        self.data[pos..pos + first].clone_from_slice(&tail[..first]);
        let rest = &tail[first..];
        self.data[..rest.len()].clone_from_slice(rest);
        pos = (pos + tail.len()) % size;

        self.write_pos = pos;
        self.written += elems.len() as u64;
    }

    /// Element at chronological position `index`
    pub fn get(&self, index: usize) -> Result<&T, DspError> {
        let size = self.data.len();
        if index >= size {
            return Err(DspError::IndexOutOfRange { index, size });
        }
        Ok(&self.data[(self.write_pos + index) % size])
    }

    /// Most recently inserted element (the fill value before any insert)
    pub fn newest(&self) -> &T {
        let size = self.data.len();
        &self.data[(self.write_pos + size - 1) % size]
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (newer, older) = self.data.split_at(self.write_pos);
        older.iter().chain(newer.iter())
    }

    /// Copy of the whole buffer, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.data.len());
        out.extend_from_slice(&self.data[self.write_pos..]);
        out.extend_from_slice(&self.data[..self.write_pos]);
        out
    }

    /// Copy the buffer into `dst`, oldest first.
    pub fn copy_into(&self, dst: &mut [T]) -> Result<(), DspError> {
        if dst.len() != self.data.len() {
            return Err(DspError::SizeMismatch {
                expected: self.data.len(),
                actual: dst.len(),
            });
        }
        let older = self.data.len() - self.write_pos;
        dst[..older].clone_from_slice(&self.data[self.write_pos..]);
        dst[older..].clone_from_slice(&self.data[..self.write_pos]);
        Ok(())
    }

    /// The newest `count` elements, oldest first. `count` is capped to the size.
    pub fn latest(&self, count: usize) -> Vec<T> {
        let count = count.min(self.data.len());
        self.iter().skip(self.data.len() - count).cloned().collect()
    }
}
