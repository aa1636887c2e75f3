/// Fixed-capacity circular sample queue.
///
/// Single producer, single consumer, no internal locking: callers own the
/// discipline (wrap in `parking_lot::Mutex` when the roles live on different
/// threads). Storage is allocated once in [`RingBuffer::new`].
///
/// Overflow behavior: the newest samples that do not fit are dropped and
/// [`RingBuffer::push`] reports it. Underrun behavior: [`RingBuffer::get`]
/// zero-fills whatever it could not supply.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    write_index: usize,
    read_index: usize,
    available: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![T::default(); capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
        }
    }

    /// Append samples.
    ///
    /// Returns `false` if not everything fit; the samples that fit are kept
    /// and the tail of `samples` is discarded.
    pub fn push(&mut self, samples: &[T]) -> bool {
        let to_write = samples.len().min(self.free());
        let capacity = self.capacity();

        let first = to_write.min(capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        let second = to_write - first;
        if second > 0 {
            self.buffer[..second].copy_from_slice(&samples[first..to_write]);
        }

        if capacity > 0 {
            self.write_index = (self.write_index + to_write) % capacity;
        }
        self.available += to_write;
        to_write == samples.len()
    }

    /// Fill `dest` with the oldest samples.
    ///
    /// Returns how many real samples were copied; the rest of `dest` is set to
    /// `T::default()`.
    pub fn get(&mut self, dest: &mut [T]) -> usize {
        let to_read = dest.len().min(self.available);
        let capacity = self.capacity();

        let first = to_read.min(capacity - self.read_index);
        dest[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        let second = to_read - first;
        if second > 0 {
            dest[first..to_read].copy_from_slice(&self.buffer[..second]);
        }
        dest[to_read..].fill(T::default());

        if capacity > 0 {
            self.read_index = (self.read_index + to_read) % capacity;
        }
        self.available -= to_read;
        to_read
    }

    /// Drop up to `count` of the oldest samples. Returns how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        let dropped = count.min(self.available);
        if dropped > 0 {
            self.read_index = (self.read_index + dropped) % self.capacity();
            self.available -= dropped;
        }
        dropped
    }

    /// Number of samples currently available for reading.
    pub fn size(&self) -> usize {
        self.available
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn clear(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}
