//! Gapless scheduling of inbound audio against the output clock.
//!
//! Each chunk starts where the previous one ends, or immediately when the
//! output has already caught up. An interruption silences everything queued
//! and forgets the watermark so the next chunk plays at once.

use std::collections::BTreeSet;

use crate::audio::pcm;
use crate::audio::{OutputDevice, VoiceId};
use crate::error::Result;

/// Where and when a chunk landed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: VoiceId,
    pub start_at: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    sample_rate: u32,
    /// End of the last scheduled chunk; `0.0` when unset.
    next_start: f64,
    active: BTreeSet<VoiceId>,
    next_id: u64,
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(output: Box<dyn OutputDevice>, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            next_start: 0.0,
            active: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Decode a base64 mono PCM16 chunk and queue it behind everything
    /// already scheduled. On a decode error nothing changes.
    pub fn on_audio_chunk(&mut self, data: &str) -> Result<Scheduled> {
        let bytes = pcm::decode(data)?;
        let buffer = pcm::decode_audio_data(&bytes, self.sample_rate, 1)?;
        let duration = buffer.duration();

        let start_at = self.next_start.max(self.output.current_time());
        let id = VoiceId(self.next_id);

        self.output.start(id, buffer, start_at)?;
        self.next_id += 1;
        self.active.insert(id);
        self.next_start = start_at + duration;

        tracing::trace!("scheduled {id:?} at {start_at:.3}s for {duration:.3}s");

        Ok(Scheduled {
            id,
            start_at,
            duration,
        })
    }

    /// A voice finished on its own. Unknown ids are ignored, since a flush
    /// may have removed the voice first.
    pub fn on_completed(&mut self, id: VoiceId) {
        self.active.remove(&id);
    }

    /// Barge-in: stop every queued or playing voice and reset the watermark.
    pub fn on_interrupted(&mut self) {
        if !self.active.is_empty() {
            tracing::debug!("interrupted: flushing {} buffer(s)", self.active.len());
        }
        for id in std::mem::take(&mut self.active) {
            self.output.stop(id);
        }
        self.next_start = 0.0;
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }

    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.on_interrupted();
    }
}
