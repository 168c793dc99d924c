use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Append-only transcript that keeps the most recent `max_lines` for display.
#[derive(Debug)]
pub struct TranscriptLog {
    lines: VecDeque<TranscriptLine>,
    max_lines: usize,
    user_label: String,
    model_label: String,
}

impl TranscriptLog {
    #[must_use]
    pub fn new(max_lines: usize, user_label: &str, model_label: &str) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines: max_lines.max(1),
            user_label: user_label.to_string(),
            model_label: model_label.to_string(),
        }
    }

    pub fn push(&mut self, speaker: Speaker, text: &str) -> &TranscriptLine {
        if self.lines.len() == self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(TranscriptLine {
            speaker,
            text: text.to_string(),
            at: Utc::now(),
        });
        &self.lines[self.lines.len() - 1]
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn label(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.user_label,
            Speaker::Model => &self.model_label,
        }
    }

    /// `label: text`, the way a line is shown.
    #[must_use]
    pub fn render(&self, line: &TranscriptLine) -> String {
        format!("{}: {}", self.label(line.speaker), line.text)
    }

    /// `[HH:MM:SS] label: text` in local time, for a running console log.
    #[must_use]
    pub fn render_stamped(&self, line: &TranscriptLine) -> String {
        let local = line.at.with_timezone(&Local);
        format!("[{}] {}", local.format("%H:%M:%S"), self.render(line))
    }
}

impl fmt::Display for TranscriptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", self.render(line))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_lines() {
        let mut log = TranscriptLog::new(3, "You", "Bolo");
        for i in 0..5 {
            log.push(Speaker::User, &format!("line {i}"));
        }
        let texts: Vec<&str> = log.lines().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn renders_with_labels() {
        let mut log = TranscriptLog::new(11, "You", "Bolo");
        log.push(Speaker::User, "namaste");
        log.push(Speaker::Model, "radhe radhe");
        assert_eq!(log.to_string(), "You: namaste\nBolo: radhe radhe\n");
    }

    #[test]
    fn stamped_line_shows_local_time() {
        use chrono::TimeZone;

        let log = TranscriptLog::new(11, "You", "Bolo");
        let at = Utc
            .with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
            .single()
            .unwrap_or_else(|| panic!("invalid timestamp"));
        let line = TranscriptLine {
            speaker: Speaker::Model,
            text: "shubh prabhat".to_string(),
            at,
        };

        let time_str = at.with_timezone(&Local).format("%H:%M:%S").to_string();
        assert_eq!(
            log.render_stamped(&line),
            format!("[{time_str}] Bolo: shubh prabhat")
        );
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = TranscriptLog::new(2, "a", "b");
        log.push(Speaker::Model, "x");
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }
}
