//! Typed CW text, cut into send units.

/// How typed text is cut into units for the keyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Each whitespace-delimited word is its own unit.
    #[default]
    Word,
    /// Everything up to a line break is one unit.
    Whole,
}

/// Accumulates characters typed into a CW console and hands out units
/// ready to send.
///
/// Units are final once returned. Changing the mode only affects how the
/// text still pending is cut.
#[derive(Debug, Clone, Default)]
pub struct CwInputBuffer {
    mode: SendMode,
    pending: String,
}

impl CwInputBuffer {
    pub fn new(mode: SendMode) -> Self {
        Self {
            mode,
            pending: String::new(),
        }
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SendMode) {
        self.mode = mode;
    }

    /// Text typed but not yet handed out.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Add one typed character; returns the units it completed.
    pub fn push(&mut self, c: char) -> Vec<String> {
        match (self.mode, c) {
            (SendMode::Word, c) if c.is_whitespace() => self.take_words(),
            (SendMode::Whole, '\r' | '\n') => self.take_line().into_iter().collect(),
            (_, c) => {
                self.pending.push(c);
                Vec::new()
            }
        }
    }

    /// Add typed text; returns every unit it completed, in order.
    pub fn push_str(&mut self, text: &str) -> Vec<String> {
        text.chars().flat_map(|c| self.push(c)).collect()
    }

    /// Remove the last pending character.
    pub fn backspace(&mut self) -> Option<char> {
        self.pending.pop()
    }

    /// Hand out whatever is pending as units of the current mode.
    pub fn flush(&mut self) -> Vec<String> {
        match self.mode {
            SendMode::Word => self.take_words(),
            SendMode::Whole => self.take_line().into_iter().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn take_words(&mut self) -> Vec<String> {
        let units = self.pending.split_whitespace().map(String::from).collect();
        self.pending.clear();
        units
    }

    fn take_line(&mut self) -> Option<String> {
        let line = self.pending.trim().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}

/// Cut a complete text into units for `mode`.
pub fn split_units(text: &str, mode: SendMode) -> Vec<String> {
    let mut buffer = CwInputBuffer::new(mode);
    let mut units = buffer.push_str(text);
    units.extend(buffer.flush());
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_mode_yields_at_whitespace() {
        let mut b = CwInputBuffer::new(SendMode::Word);
        assert!(b.push_str("CQ").is_empty());
        assert_eq!(b.push(' '), ["CQ"]);
        assert_eq!(b.push_str("TEST  DL1ABC "), ["TEST", "DL1ABC"]);
        assert_eq!(b.pending(), "");
    }

    #[test]
    fn whole_mode_yields_at_line_break() {
        let mut b = CwInputBuffer::new(SendMode::Whole);
        assert!(b.push_str("CQ TEST").is_empty());
        assert_eq!(b.push('\n'), ["CQ TEST"]);
        assert!(b.push('\n').is_empty());
    }

    #[test]
    fn mode_switch_keeps_yielded_units() {
        let mut b = CwInputBuffer::new(SendMode::Word);
        let first = b.push_str("CQ ");
        b.set_mode(SendMode::Whole);
        let rest = b.push_str("TEST DL1ABC\n");
        assert_eq!(first, ["CQ"]);
        assert_eq!(rest, ["TEST DL1ABC"]);

        b.push_str("5NN TU");
        b.set_mode(SendMode::Word);
        assert_eq!(b.flush(), ["5NN", "TU"]);
    }

    #[test]
    fn backspace_edits_pending_text() {
        let mut b = CwInputBuffer::new(SendMode::Word);
        b.push_str("TESX");
        assert_eq!(b.backspace(), Some('X'));
        b.push('T');
        assert_eq!(b.flush(), ["TEST"]);
    }

    #[test]
    fn split_complete_text() {
        assert_eq!(split_units("CQ TEST", SendMode::Word), ["CQ", "TEST"]);
        assert_eq!(split_units("CQ TEST", SendMode::Whole), ["CQ TEST"]);
        assert!(split_units("  ", SendMode::Whole).is_empty());
    }
}
