/// Reassembles newline-delimited lines from a chunked byte stream.
///
/// Bytes after the last `\n` stay in the pending buffer until a later feed
/// completes them, so a line split across chunks comes back byte-for-byte.
/// Feeding never fails; there are no error conditions at this stage.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, get every line it completes, in arrival order.
    /// The terminator is not part of the returned line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drop any buffered partial line.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
#[path = "framing_test.rs"]
mod framing_test;
