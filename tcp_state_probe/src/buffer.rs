use crate::snapshot::Snapshot;

/// Fixed-capacity circular log of snapshots.
///
/// One slot is always kept free so `head == tail` means empty without a
/// separate "full" flag; at most `capacity - 1` records are held at once.
/// The buffer does no locking itself, callers serialize access.
pub struct RingBuffer {
    storage: Box<[Option<Snapshot>]>,
    mask: usize,
    head: usize,
    tail: usize,
    dropped: u64,
}

/// Outcome of [`RingBuffer::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Admitted,
    Dropped,
}

impl RingBuffer {
    /// `capacity` must be a power of two and at least 2.
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity >= 2);
        debug_assert_eq!(capacity & (capacity - 1), 0);

        RingBuffer {
            storage: vec![None; capacity].into_boxed_slice(),
            mask: capacity - 1,
            head: 0,
            tail: 0,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn occupied(&self) -> usize {
        self.head.wrapping_sub(self.tail) & self.mask
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.occupied() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Stores `snapshot` if there is room, otherwise counts a drop.
    pub fn try_push(&mut self, snapshot: Snapshot) -> Push {
        if self.available() == 0 {
            self.dropped += 1;
            return Push::Dropped;
        }
        self.storage[self.head] = Some(snapshot);
        self.head = (self.head + 1) & self.mask;
        Push::Admitted
    }

    /// Oldest record, left in place until [`RingBuffer::advance`].
    pub fn peek(&self) -> Option<&Snapshot> {
        if self.is_empty() {
            return None;
        }
        self.storage[self.tail].as_ref()
    }

    /// Commits consumption of the record returned by the last `peek`.
    pub fn advance(&mut self) {
        if !self.is_empty() {
            self.storage[self.tail] = None;
            self.tail = (self.tail + 1) & self.mask;
        }
    }

    /// Empties the log without reallocating. The drop counter survives.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.storage.iter_mut().for_each(|slot| *slot = None);
    }
}
