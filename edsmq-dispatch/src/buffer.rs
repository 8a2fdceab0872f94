use crate::request::ResultEntry;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Completed results waiting for the host to pick them up, oldest first.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    entries: Mutex<VecDeque<ResultEntry>>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: ResultEntry) {
        self.lock().push_back(entry);
    }

    /// Removes and returns the oldest entry. Never waits.
    pub fn pop_first(&self) -> Option<ResultEntry> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ResultEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use serde_json::json;

    fn entry(n: u32) -> ResultEntry {
        ResultEntry {
            request: Request::get("api-status-v1", "elite-server"),
            reply: json!({ "n": n }),
        }
    }

    #[test]
    fn pops_oldest_first() {
        let buf = ResultBuffer::new();
        buf.push(entry(1));
        buf.push(entry(2));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pop_first().unwrap().reply["n"], 1);
        assert_eq!(buf.pop_first().unwrap().reply["n"], 2);
    }

    #[test]
    fn empty_buffer_yields_none() {
        let buf = ResultBuffer::new();
        assert!(buf.pop_first().is_none());
        assert!(buf.is_empty());
    }
}
