use parking_lot::RwLock;

/// Capacity used when zero is requested
pub const DEFAULT_CAPACITY: usize = 1_000;

/// Fixed-capacity history that overwrites its oldest entry once full.
///
/// Readers share the lock; `push` and `clear` take it exclusively. All reads
/// return owned copies in chronological order.
#[derive(Debug)]
pub struct RingBuffer<T> {
    inner: RwLock<Slots<T>>,
}

#[derive(Debug)]
struct Slots<T> {
    entries: Vec<Option<T>>,
    cursor: usize,
    count: usize,
}

impl<T> Slots<T> {
    fn capacity(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);

        Self {
            inner: RwLock::new(Slots {
                entries,
                cursor: 0,
                count: 0,
            }),
        }
    }

    /// Store an entry, evicting the oldest when full
    pub fn push(&self, entry: T) {
        let mut slots = self.inner.write();
        let capacity = slots.capacity();
        let cursor = slots.cursor;

        slots.entries[cursor] = Some(entry);
        slots.cursor = (cursor + 1) % capacity;
        if slots.count < capacity {
            slots.count += 1;
        }
    }

    /// Every live entry, oldest first
    pub fn get_all(&self) -> Vec<T> {
        let slots = self.inner.read();
        let capacity = slots.capacity();

        if slots.count < capacity {
            // Not yet wrapped: live entries sit at 0..count
            return slots.entries[..slots.count].iter().flatten().cloned().collect();
        }

        // Full: oldest entry is at the cursor
        let (newer, older) = slots.entries.split_at(slots.cursor);
        older.iter().chain(newer.iter()).flatten().cloned().collect()
    }

    /// The most recent `min(n, count)` entries, oldest first
    pub fn get_last(&self, n: usize) -> Vec<T> {
        let slots = self.inner.read();
        let n = n.min(slots.count);
        if n == 0 {
            return Vec::new();
        }

        let capacity = slots.capacity();
        let start = (slots.cursor + capacity - n) % capacity;
        (0..n)
            .filter_map(|i| slots.entries[(start + i) % capacity].clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().count
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Forget every entry; storage is kept
    pub fn clear(&self) {
        let mut slots = self.inner.write();
        for slot in slots.entries.iter_mut() {
            *slot = None;
        }
        slots.cursor = 0;
        slots.count = 0;
    }
}

impl<T: Clone> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn filled(capacity: usize, n: usize) -> RingBuffer<usize> {
        let buffer = RingBuffer::new(capacity);
        for i in 0..n {
            buffer.push(i);
        }
        buffer
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let buffer: RingBuffer<u8> = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), DEFAULT_CAPACITY);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_wraps_keeping_newest() {
        let buffer = filled(3, 5);
        assert_eq!(buffer.count(), 3);
        assert_eq!(buffer.get_all(), vec![2, 3, 4]);
    }

    #[test]
    fn test_get_last_before_wrap() {
        let buffer = filled(10, 7);
        assert_eq!(buffer.get_last(3), vec![4, 5, 6]);
    }

    #[test]
    fn test_get_all_below_and_above_capacity() {
        for capacity in [1, 4, 7] {
            for n in 0..=capacity * 3 {
                let buffer = filled(capacity, n);
                let kept = n.min(capacity);
                let expected: Vec<usize> = (n - kept..n).collect();

                assert_eq!(buffer.count(), kept, "capacity {} n {}", capacity, n);
                assert_eq!(buffer.get_all(), expected, "capacity {} n {}", capacity, n);
            }
        }
    }

    #[test]
    fn test_get_last_bounds() {
        let buffer = filled(4, 6);
        assert!(buffer.get_last(0).is_empty());
        assert_eq!(buffer.get_last(1), vec![5]);
        assert_eq!(buffer.get_last(4), vec![2, 3, 4, 5]);
        assert_eq!(buffer.get_last(100), vec![2, 3, 4, 5]);

        let empty: RingBuffer<usize> = RingBuffer::new(4);
        assert!(empty.get_last(3).is_empty());
        assert!(empty.get_all().is_empty());
    }

    #[test]
    fn test_clear_behaves_like_fresh() {
        let buffer = filled(3, 5);
        buffer.clear();
        assert_eq!(buffer.count(), 0);
        assert_eq!(buffer.capacity(), 3);
        assert!(buffer.get_all().is_empty());

        buffer.push(10);
        buffer.push(11);
        assert_eq!(buffer.get_all(), vec![10, 11]);
        assert_eq!(buffer.get_last(5), vec![10, 11]);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let buffer = Arc::new(RingBuffer::new(50));

        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..1_000usize {
                    buffer.push(i);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = buffer.get_all();
                        assert!(snapshot.len() <= 50);
                        assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.get_all(), (950..1_000).collect::<Vec<_>>());
    }
}
