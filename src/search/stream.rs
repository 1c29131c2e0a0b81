//! Streaming search results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;

use super::FindMatch;

const QUEUE_DEPTH: usize = 256;

/// Matches published by a background search, in address order.
///
/// `next` blocks until a match arrives or the search finishes. Dropping the
/// results cancels the search and joins its thread.
pub struct SearchResults {
    receiver: Option<Receiver<FindMatch>>,
    peeked: Option<FindMatch>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SearchResults {
    pub(crate) fn spawn<F>(job: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, SyncSender<FindMatch>) + Send + 'static,
    {
        let (sender, receiver) = sync_channel(QUEUE_DEPTH);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let worker = match thread::Builder::new()
            .name("vspace-search".into())
            .spawn(move || job(flag, sender))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to spawn search thread");
                None
            }
        };
        Self {
            receiver: Some(receiver),
            peeked: None,
            cancel,
            worker,
        }
    }

    /// Block until a match is available (true) or the search is exhausted (false).
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.receiver.as_ref().and_then(|r| r.recv().ok());
        }
        self.peeked.is_some()
    }

    /// Ask the search to stop; matches already queued are still delivered.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

impl Iterator for SearchResults {
    type Item = FindMatch;

    fn next(&mut self) -> Option<FindMatch> {
        if !self.has_next() {
            return None;
        }
        self.peeked.take()
    }
}

impl Drop for SearchResults {
    fn drop(&mut self) {
        self.cancel();
        // a blocked sender fails once the receiver is gone
        self.receiver.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("search thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::MatchValue;

    fn hit(address: u64) -> FindMatch {
        FindMatch {
            address,
            value: MatchValue::Constant(address),
            line: None,
        }
    }

    #[test]
    fn test_drop_unblocks_full_queue() {
        let results = SearchResults::spawn(|cancel, sender| {
            let mut address = 0;
            while !cancel.load(Ordering::Acquire) {
                if sender.send(hit(address)).is_err() {
                    break;
                }
                address += 1;
            }
        });
        drop(results);
    }

    #[test]
    fn test_has_next_is_idempotent() {
        let mut results = SearchResults::spawn(|_, sender| {
            let _ = sender.send(hit(7));
        });
        assert!(results.has_next());
        assert!(results.has_next());
        assert_eq!(results.next().map(|m| m.address), Some(7));
        assert!(results.next().is_none());
    }
}
