use std::collections::VecDeque;

/// Recent terminal output, bounded by total bytes with oldest-chunk eviction.
///
/// Lets a reconnecting view repaint immediately without a server round trip.
/// Chunks at or below the last buffered sequence are replays and are skipped.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    chunks: VecDeque<(u64, String)>,
    bytes: usize,
    max_bytes: usize,
    last_seq: u64,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            max_bytes,
            last_seq: 0,
        }
    }

    pub fn push(&mut self, seq: u64, chunk: &str) -> bool {
        if seq <= self.last_seq {
            return false;
        }
        self.last_seq = seq;

        let chunk = tail_within(chunk, self.max_bytes);
        if chunk.is_empty() {
            return true;
        }
        self.bytes += chunk.len();
        self.chunks.push_back((seq, chunk.to_string()));

        while self.bytes > self.max_bytes {
            match self.chunks.pop_front() {
                Some((_, evicted)) => self.bytes -= evicted.len(),
                None => break,
            }
        }
        true
    }

    /// Drops everything, including the replay guard, after a history gap.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
        self.last_seq = 0;
    }

    pub fn snapshot(&self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for (_, chunk) in &self.chunks {
            out.push_str(chunk);
        }
        out
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn first_seq(&self) -> Option<u64> {
        self.chunks.front().map(|(seq, _)| *seq)
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

// Keeps the last `max_bytes` of `chunk`, cut on a char boundary.
fn tail_within(chunk: &str, max_bytes: usize) -> &str {
    if chunk.len() <= max_bytes {
        return chunk;
    }
    let mut start = chunk.len() - max_bytes;
    while !chunk.is_char_boundary(start) {
        start += 1;
    }
    &chunk[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_chunks_over_budget() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push(1, "aaaa");
        buffer.push(2, "bbbb");
        buffer.push(3, "cccc");
        assert_eq!(buffer.snapshot(), "bbbbcccc");
        assert_eq!(buffer.bytes(), 8);
        assert_eq!(buffer.first_seq(), Some(2));
    }

    #[test]
    fn replayed_chunks_are_skipped() {
        let mut buffer = OutputBuffer::new(100);
        assert!(buffer.push(1, "a"));
        assert!(buffer.push(2, "b"));
        assert!(!buffer.push(2, "b"));
        assert!(!buffer.push(1, "a"));
        assert_eq!(buffer.snapshot(), "ab");
    }

    #[test]
    fn oversized_chunk_keeps_its_tail() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push(1, "xy");
        buffer.push(2, "héllo");
        assert_eq!(buffer.snapshot(), "llo");
        assert!(buffer.bytes() <= 4);
    }

    #[test]
    fn reset_clears_replay_guard() {
        let mut buffer = OutputBuffer::new(100);
        buffer.push(50, "old");
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.push(10, "new"));
        assert_eq!(buffer.snapshot(), "new");
    }
}
