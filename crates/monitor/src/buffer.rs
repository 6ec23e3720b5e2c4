use std::collections::VecDeque;

/// Fixed-capacity FIFO of recent closes for one stream, oldest first.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl StreamBuffer {
    /// A zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Raise the capacity. Never shrinks.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.values.reserve(capacity - self.values.len());
            self.capacity = capacity;
        }
    }

    /// The most recent `n` values, oldest first, or `None` if fewer are held.
    pub fn window(&mut self, n: usize) -> Option<&[f64]> {
        if n == 0 || n > self.values.len() {
            return None;
        }
        let values = self.values.make_contiguous();
        Some(&values[values.len() - n..])
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut buf = StreamBuffer::new(3);
        for v in 1..=5 {
            buf.push(v as f64);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn window_returns_trailing_values() {
        let mut buf = StreamBuffer::new(4);
        for v in [10.0, 11.0, 12.0, 13.0, 14.0] {
            buf.push(v);
        }
        assert_eq!(buf.window(2).unwrap(), &[13.0, 14.0]);
        assert_eq!(buf.window(4).unwrap(), &[11.0, 12.0, 13.0, 14.0]);
        assert!(buf.window(5).is_none());
        assert!(buf.window(0).is_none());
    }

    #[test]
    fn grow_keeps_contents_and_never_shrinks() {
        let mut buf = StreamBuffer::new(2);
        buf.push(1.0);
        buf.push(2.0);
        buf.grow_to(4);
        buf.push(3.0);
        assert_eq!(buf.len(), 3);
        buf.grow_to(1);
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn zero_capacity_holds_one_value() {
        let mut buf = StreamBuffer::new(0);
        buf.push(1.0);
        buf.push(2.0);
        assert_eq!(buf.window(1).unwrap(), &[2.0]);
    }
}
