use std::collections::VecDeque;

/// Rolling buffer of the most recent power samples, newest first
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SmoothingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest beyond capacity
    pub fn push(&mut self, watts: f64) {
        self.samples.push_front(watts);
        self.samples.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Arithmetic mean, `None` while empty
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples, newest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_never_exceeds_capacity() {
        let mut window = SmoothingWindow::new(3);
        for i in 0..10 {
            window.push(i as f64);
            assert!(window.len() <= 3);
        }
        assert!(window.is_full());
        assert_eq!(window.samples().collect::<Vec<_>>(), vec![9.0, 8.0, 7.0]);
    }

    #[test]
    fn mean_of_recent_samples() {
        let mut window = SmoothingWindow::new(3);
        assert_eq!(window.mean(), None);
        window.push(100.0);
        assert_eq!(window.mean(), Some(100.0));
        window.push(200.0);
        window.push(600.0);
        window.push(-300.0);
        assert_eq!(window.mean(), Some(500.0 / 3.0));
    }

    #[test]
    fn clear_empties_window() {
        let mut window = SmoothingWindow::new(2);
        window.push(1.0);
        window.push(2.0);
        window.clear();
        assert!(window.is_empty());
        assert!(!window.is_full());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut window = SmoothingWindow::new(0);
        window.push(5.0);
        assert_eq!(window.capacity(), 1);
        assert!(window.is_full());
    }
}
