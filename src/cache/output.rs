//! Capture buffer with nested marks.
//!
//! Scopes write into one growing string; each open scope owns a mark into
//! it. Closing or nesting a scope drains everything written since the
//! innermost mark.

use std::fmt;

#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
    marks: Vec<usize>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Open a capture region at the current end of the buffer.
    pub fn push_mark(&mut self) {
        self.marks.push(self.text.len());
    }

    /// Drain the text written since the innermost mark, keeping the mark.
    ///
    /// With no mark open this drains nothing.
    pub fn take_since_mark(&mut self) -> String {
        match self.marks.last() {
            Some(&mark) => self.text.split_off(mark),
            None => String::new(),
        }
    }

    /// Close the innermost capture region, returning its pending text.
    pub fn pop_mark(&mut self) -> String {
        let pending = self.take_since_mark();
        self.marks.pop();
        pending
    }

    /// Number of open capture regions.
    pub fn depth(&self) -> usize {
        self.marks.len()
    }

    /// Drain text written outside any capture region.
    pub fn take_root(&mut self) -> String {
        let end = self.marks.first().copied().unwrap_or(self.text.len());
        let rest = self.text.split_off(end);
        let root = std::mem::replace(&mut self.text, rest);
        for mark in &mut self.marks {
            *mark -= end;
        }
        root
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Write for OutputBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}
