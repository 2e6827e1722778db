//! Fixed-capacity buffers of addresses awaiting scanning.

/// A LIFO buffer of object addresses.
///
/// Capacity is fixed when the buffer is created; buffers live in the work
/// pool's node arena and are recycled between workers, never freed.
#[derive(Debug, Default)]
pub struct WorkBuf {
    nobj: usize,
    obj: Box<[usize]>,
}

impl WorkBuf {
    /// Creates an empty buffer holding up to `capacity` addresses.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { nobj: 0, obj: vec![0; capacity].into_boxed_slice() }
    }

    /// Addresses held.
    #[inline]
    pub fn len(&self) -> usize {
        self.nobj
    }

    /// Whether the buffer holds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nobj == 0
    }

    /// Whether another push would overflow.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.nobj == self.obj.len()
    }

    /// Maximum number of addresses.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.obj.len()
    }

    /// Appends `addr`. The buffer must not be full.
    #[inline]
    pub(crate) fn push(&mut self, addr: usize) {
        self.obj[self.nobj] = addr;
        self.nobj += 1;
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<usize> {
        self.nobj = self.nobj.checked_sub(1)?;
        Some(self.obj[self.nobj])
    }

    /// Moves the newer half of the addresses into `other`, which must be empty.
    pub(crate) fn split_into(&mut self, other: &mut WorkBuf) {
        let n = self.nobj / 2;
        self.nobj -= n;
        other.obj[..n].copy_from_slice(&self.obj[self.nobj..self.nobj + n]);
        other.nobj = n;
    }

    /// Drops every address.
    pub(crate) fn clear(&mut self) {
        self.nobj = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_order() {
        let mut b = WorkBuf::with_capacity(3);
        b.push(1);
        b.push(2);
        b.push(3);
        assert!(b.is_full());
        assert_eq!(b.pop(), Some(3));
        assert_eq!(b.pop(), Some(2));
        assert_eq!(b.pop(), Some(1));
        assert_eq!(b.pop(), None);
    }

    #[test]
    fn split_moves_half() {
        let mut a = WorkBuf::with_capacity(8);
        let mut b = WorkBuf::with_capacity(8);
        for i in 0..7 {
            a.push(i);
        }
        a.split_into(&mut b);
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 3);
        assert_eq!(b.pop(), Some(6));
        assert_eq!(a.pop(), Some(3));
    }
}
