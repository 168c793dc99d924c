/// Slices a continuous mono stream into fixed-size frames.
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    frame_samples: usize,
}

impl FrameAccumulator {
    #[must_use]
    pub fn new(frame_samples: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(frame_samples),
            frame_samples: frame_samples.max(1),
        }
    }

    /// Feed samples and return any complete frames.
    pub fn feed(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_samples {
            frames.push(self.buffer.drain(..self.frame_samples).collect());
        }

        frames
    }

    /// Flush remaining samples as a short final frame (end of a finite source).
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() {
            return None;
        }

        Some(self.buffer.drain(..).collect())
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
