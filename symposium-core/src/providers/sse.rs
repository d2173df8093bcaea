//! Incremental SSE line buffering shared by the streaming backends.
//!
//! Server-sent events arrive as arbitrary byte chunks; a line (and even a
//! UTF-8 code point) can straddle a chunk boundary. The buffer accumulates
//! bytes and yields only complete lines.

/// Accumulates raw bytes and yields complete, `\r`-stripped lines.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain every line completed by it.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop(); // the '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}
