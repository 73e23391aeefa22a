/// Number of trailing words callers usually display.
pub const TRANSCRIPT_WINDOW_WORDS: usize = 20;

/// Append-only accumulator for the model's spoken output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transcription fragment, separated from the previous one by a
    /// single space. Blank fragments are ignored.
    pub fn push(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(fragment);
    }

    /// The last `words` words of the transcript.
    pub fn window(&self, words: usize) -> String {
        let all: Vec<&str> = self.text.split_whitespace().collect();
        let skip = all.len().saturating_sub(words);
        all[skip..].join(" ")
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}
