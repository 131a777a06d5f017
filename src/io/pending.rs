// src/io/pending.rs
//
// Bounded queues between the port readers and the periodic flush.
// Both drop data under overload instead of blocking: the display queue
// sheds its oldest lines, the log queue sheds the whole pending batch.

use std::collections::VecDeque;

/// Rendered lines waiting for the display. Keeps the newest `max_items`.
#[derive(Debug)]
pub struct DisplayQueue {
    items: VecDeque<String>,
    max_items: usize,
    dropped: u64,
}

impl DisplayQueue {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_items: max_items.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        self.items.push_back(line);
        while self.items.len() > self.max_items {
            self.items.pop_front();
            self.dropped += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lines discarded by the cap so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Take every pending line as one chunk
    pub fn drain_joined(&mut self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        let chunk: String = self.items.drain(..).collect();
        Some(chunk)
    }
}

/// Lines waiting for the aggregate log, bounded by total bytes.
#[derive(Debug)]
pub struct LogQueue {
    items: Vec<String>,
    bytes: usize,
    max_bytes: usize,
    dropped_batches: u64,
}

impl LogQueue {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            items: Vec::new(),
            bytes: 0,
            max_bytes,
            dropped_batches: 0,
        }
    }

    /// Queue a line. Going over the byte budget discards the whole batch.
    pub fn push(&mut self, line: String) {
        self.bytes += line.len();
        self.items.push(line);
        if self.bytes > self.max_bytes {
            self.items.clear();
            self.bytes = 0;
            self.dropped_batches += 1;
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches
    }

    /// Take the pending batch as one chunk
    pub fn take(&mut self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        let chunk: String = self.items.drain(..).collect();
        self.bytes = 0;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_queue_drops_oldest() {
        let mut queue = DisplayQueue::new(3);
        for i in 0..5 {
            queue.push(format!("line{}\n", i));
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.drain_joined().unwrap(), "line2\nline3\nline4\n");
        assert!(queue.is_empty());
        assert!(queue.drain_joined().is_none());
    }

    #[test]
    fn test_log_queue_drops_whole_batch_on_overflow() {
        let mut queue = LogQueue::new(10);
        queue.push("aaaa\n".to_string());
        queue.push("bbbb\n".to_string());
        assert_eq!(queue.pending_bytes(), 10);

        queue.push("c\n".to_string());
        assert!(queue.is_empty());
        assert_eq!(queue.pending_bytes(), 0);
        assert_eq!(queue.dropped_batches(), 1);

        queue.push("dd\n".to_string());
        assert_eq!(queue.take().unwrap(), "dd\n");
        assert_eq!(queue.pending_bytes(), 0);
    }
}
