// Reader for responses that end with a sentinel line
//
// Some controllers stream an arbitrary number of progress lines and finish
// with a line starting with an end token (e.g. `EOR:950`) followed by exactly
// one status line. Bytes may arrive split at any point, so the reader
// assembles complete lines before classifying them.

/// Progress of a sentinel-terminated read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AwaitingLines,
    SentinelSeen,
    Done,
}

#[derive(Debug, Clone)]
pub struct SentinelReader {
    tokens: &'static [&'static str],
    state: ReadState,
    lines: Vec<String>,
    sentinel: Option<usize>,
    pending: Vec<u8>,
}

/// What a sentinel read produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelOutcome {
    pub lines: Vec<String>,
    /// Index into `lines` of the sentinel line, if one arrived
    pub sentinel: Option<usize>,
    pub state: ReadState,
}

impl SentinelOutcome {
    pub fn sentinel_line(&self) -> Option<&str> {
        self.sentinel.map(|i| self.lines[i].as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.state == ReadState::Done
    }
}

impl SentinelReader {
    pub fn new(tokens: &'static [&'static str]) -> Self {
        Self {
            tokens,
            state: ReadState::AwaitingLines,
            lines: Vec::new(),
            sentinel: None,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Feed raw bytes; complete lines are classified, the rest is kept
    pub fn push_bytes(&mut self, bytes: &[u8]) -> ReadState {
        for &byte in bytes {
            if self.state == ReadState::Done {
                break;
            }
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.pending);
                self.push_line(&String::from_utf8_lossy(&raw));
            } else {
                self.pending.push(byte);
            }
        }
        self.state
    }

    /// Feed one complete line
    pub fn push_line(&mut self, line: &str) -> ReadState {
        let line = line.trim();
        if line.is_empty() || self.state == ReadState::Done {
            return self.state;
        }

        self.lines.push(line.to_string());
        self.state = match self.state {
            ReadState::AwaitingLines if self.is_sentinel(line) => {
                self.sentinel = Some(self.lines.len() - 1);
                ReadState::SentinelSeen
            }
            ReadState::AwaitingLines => ReadState::AwaitingLines,
            ReadState::SentinelSeen | ReadState::Done => ReadState::Done,
        };
        self.state
    }

    fn is_sentinel(&self, line: &str) -> bool {
        self.tokens.iter().any(|token| line.starts_with(token))
    }

    /// Stop reading; a trailing partial line is kept as-is
    pub fn finish(mut self) -> SentinelOutcome {
        if self.state != ReadState::Done && !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            self.push_line(&String::from_utf8_lossy(&raw));
        }
        SentinelOutcome {
            lines: self.lines,
            sentinel: self.sentinel,
            state: self.state,
        }
    }
}
