//! Single-slot, latest-wins frame buffer
//!
//! Acquisition owns the only [`BufferWriter`]; display owns the
//! [`BufferReader`]. A write replaces whatever is in the slot and never waits.
//! Both halves share one stop signal that, once set, stays set.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::ReceivedArray;

#[derive(Clone)]
struct Slot {
    seq: u64,
    frame: Arc<ReceivedArray>,
}

/// Create a buffer with its own stop signal.
pub fn frame_buffer() -> (BufferWriter, BufferReader) {
    frame_buffer_with_stop(CancellationToken::new())
}

/// Create a buffer whose stop signal is `stop` (e.g. a pipeline-wide token).
pub fn frame_buffer_with_stop(stop: CancellationToken) -> (BufferWriter, BufferReader) {
    let (tx, rx) = watch::channel(None);
    (
        BufferWriter { slot: tx, seq: 0, stop: stop.clone() },
        BufferReader { slot: rx, last_seen: 0, stop },
    )
}

/// Writing half. Not `Clone`: there is exactly one writer.
///
/// Dropping the writer sets the stop signal.
pub struct BufferWriter {
    slot: watch::Sender<Option<Slot>>,
    seq: u64,
    stop: CancellationToken,
}

impl BufferWriter {
    /// Replace the slot's content. Never blocks.
    pub fn write(&mut self, frame: ReceivedArray) {
        self.write_shared(Arc::new(frame));
    }

    pub fn write_shared(&mut self, frame: Arc<ReceivedArray>) {
        self.seq += 1;
        self.slot.send_replace(Some(Slot { seq: self.seq, frame }));
    }

    /// Frames written so far.
    pub fn written(&self) -> u64 {
        self.seq
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Reading half.
pub struct BufferReader {
    slot: watch::Receiver<Option<Slot>>,
    last_seen: u64,
    stop: CancellationToken,
}

impl BufferReader {
    /// The most recent frame, whether or not it was seen before.
    pub fn latest(&mut self) -> Option<Arc<ReceivedArray>> {
        let slot = self.slot.borrow_and_update().clone()?;
        self.last_seen = slot.seq;
        Some(slot.frame)
    }

    /// The most recent frame if it was written since the last read.
    pub fn take_new(&mut self) -> Option<Arc<ReceivedArray>> {
        let slot = self.slot.borrow_and_update().clone()?;
        if slot.seq == self.last_seen {
            return None;
        }
        self.last_seen = slot.seq;
        Some(slot.frame)
    }

    /// Wait for a frame newer than the last one read, or for stop.
    ///
    /// Returns `None` once the buffer is stopped.
    pub async fn wait_new(&mut self) -> Option<Arc<ReceivedArray>> {
        loop {
            if self.stop.is_cancelled() {
                return None;
            }
            if let Some(frame) = self.take_new() {
                return Some(frame);
            }
            tokio::select! {
                _ = self.stop.cancelled() => return None,
                changed = self.slot.changed() => {
                    if changed.is_err() {
                        // Writer gone; its drop already set stop.
                        return None;
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}
