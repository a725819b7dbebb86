use std::collections::VecDeque;

use crate::asserts::ProcessOutput;

#[cfg(test)]
mod tests;

pub(crate) const DEFAULT_CAPTURE_SIZE: usize = 16;

/// Records the first and last lines of a stream so assertion failures can
/// quote what the command actually printed.
///
/// The head fills up to `max_head` lines; once it is full, later lines cycle
/// through a ring of the last `max_tail` lines. `None` limits mean
/// "unbounded" and `(0, 0)` disables capturing entirely.
pub struct OutputCapture {
    max_head: Option<usize>,
    max_tail: Option<usize>,
    stream: ProcessOutput,
    line_count: usize,
    head: Vec<String>,
    tail: VecDeque<String>,
}

impl OutputCapture {
    pub(crate) fn new(max_head: Option<usize>, max_tail: Option<usize>, stream: ProcessOutput) -> Self {
        Self {
            max_head,
            max_tail,
            stream,
            line_count: 0,
            head: Vec::new(),
            tail: VecDeque::new(),
        }
    }

    pub(crate) fn default_capture(stream: ProcessOutput) -> Self {
        Self::new(
            Some(DEFAULT_CAPTURE_SIZE),
            Some(DEFAULT_CAPTURE_SIZE),
            stream,
        )
    }

    pub(crate) fn no_capture(stream: ProcessOutput) -> Self {
        Self::new(Some(0), Some(0), stream)
    }

    pub(crate) fn capture_all(stream: ProcessOutput) -> Self {
        Self::new(None, None, stream)
    }

    /// Record the given line if there is capacity left for it.
    pub fn capture(&mut self, line: &str) {
        match self.max_head {
            None => self.head.push(line.to_string()),
            Some(max_head) => {
                if self.head.len() < max_head {
                    self.head.push(line.to_string());
                } else if self.max_tail != Some(0) {
                    if let Some(max_tail) = self.max_tail {
                        if self.tail.len() == max_tail {
                            self.tail.pop_front();
                        }
                    }
                    self.tail.push_back(line.to_string());
                }
            }
        }
        self.line_count += 1;
    }

    /// Renders the captured lines with an omitted-lines marker whenever the
    /// stream produced more than what was stored.
    pub fn render(&self) -> String {
        let stream = self.stream.name();
        if self.line_count == 0 {
            return format!("{stream}: <no output>");
        }
        if self.head.is_empty() && self.tail.is_empty() {
            return format!("{stream}: <no lines captured>");
        }

        let mut out = format!("{stream}:\n");
        for line in &self.head {
            out.push_str("\n    ");
            out.push_str(line);
        }
        let omitted = self.line_count - self.head.len() - self.tail.len();
        if omitted > 0 {
            if !self.head.is_empty() {
                out.push_str("\n    ...");
            }
            out.push_str(&format!(
                "\n    [{omitted} lines omitted; set {stream}().capture(maxHeadLines, maxTailLines) \
                 or {stream}().captureAll() to capure more lines]"
            ));
            if !self.tail.is_empty() {
                out.push_str("\n    ...");
            }
        }
        for line in &self.tail {
            out.push_str("\n    ");
            out.push_str(line);
        }
        out
    }
}
