//! Utterance text accumulation
//!
//! Interim text is unstable and overwritten by every interim result. Final
//! text only grows by whole segments until the utterance is delivered or
//! listening stops.

/// Point-in-time copy of the utterance text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    /// Latest best-effort recognition
    pub interim: String,
    /// Stable text accumulated from final results
    pub final_text: String,
}

impl TranscriptSnapshot {
    /// Text suitable for a live preview: final text followed by the interim tail
    #[must_use]
    pub fn preview(&self) -> String {
        match (self.final_text.is_empty(), self.interim.is_empty()) {
            (true, _) => self.interim.clone(),
            (false, true) => self.final_text.clone(),
            (false, false) => format!("{} {}", self.final_text, self.interim),
        }
    }
}

/// Holds interim and final text for the current utterance
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    interim: String,
    final_text: String,
}

impl TranscriptBuffer {
    /// Create an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interim: String::new(),
            final_text: String::new(),
        }
    }

    /// Append a final segment
    ///
    /// Segments are trimmed and joined with a single space. The interim text
    /// is cleared since the segment it previewed is now stable.
    pub fn append_final(&mut self, segment: &str) {
        let segment = segment.trim();
        self.interim.clear();
        if segment.is_empty() {
            return;
        }
        if !self.final_text.is_empty() {
            self.final_text.push(' ');
        }
        self.final_text.push_str(segment);
    }

    /// Replace the interim text
    pub fn set_interim(&mut self, text: &str) {
        self.interim.clear();
        self.interim.push_str(text.trim());
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            interim: self.interim.clone(),
            final_text: self.final_text.clone(),
        }
    }

    /// Accumulated final text
    #[must_use]
    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    /// Whether any final text has been accumulated
    #[must_use]
    pub const fn has_final(&self) -> bool {
        !self.final_text.is_empty()
    }

    /// Whether both interim and final text are empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.final_text.is_empty() && self.interim.is_empty()
    }

    /// Take the final text, leaving the buffer empty
    pub fn take_final(&mut self) -> String {
        self.interim.clear();
        std::mem::take(&mut self.final_text)
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.interim.clear();
        self.final_text.clear();
    }
}
