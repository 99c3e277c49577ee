use std::collections::VecDeque;

/// Simple moving average over the last `window` samples
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: VecDeque<f64>,
    window: usize,
    sum: f64,
}

impl MovingAverage {
    /// Create an average over `window` samples (a zero window behaves as one)
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
        }
    }

    /// Add a sample and return the updated average
    pub fn push(&mut self, value: f64) -> f64 {
        if self.samples.len() >= self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
        self.sum / self.samples.len() as f64
    }

    /// Current average, if any sample has been seen
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }
}
