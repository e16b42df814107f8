use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::ratelimit::{RateLimitingCategory, RateLimiter};
use crate::Envelope;

/// The outcome of trying to send a single envelope upstream.
pub enum SendOutcome {
    /// The envelope was accepted by the collector.
    Success,
    /// The collector asked us to back off for the given duration.
    RateLimited(Duration),
    /// The send failed for any other reason.
    Failure,
}

enum Task {
    SendEnvelope(Envelope),
    Flush(SyncSender<()>),
    Shutdown,
}

pub struct TransportThread {
    sender: SyncSender<Task>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TransportThread {
    /// Spawns a worker thread that feeds queued envelopes to `send`.
    ///
    /// The `send` function receives the envelope by reference along with the
    /// shared [`RateLimiter`], and reports the outcome of the attempt. With
    /// `retry_buffer` set, failed envelopes are kept around (up to that many)
    /// and retried before newly queued ones.
    pub fn new<SendFn>(retry_buffer: usize, mut send: SendFn) -> Self
    where
        SendFn: FnMut(&Envelope, &mut RateLimiter) -> SendOutcome + Send + 'static,
    {
        let (sender, receiver) = sync_channel(30);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_worker = shutdown.clone();
        let handle = thread::Builder::new()
            .name("flare-transport".into())
            .spawn(move || {
                let mut rl = RateLimiter::new();
                let mut retry_queue: VecDeque<Envelope> = VecDeque::new();

                // Returns `false` when the envelope was kept for a later retry,
                // which also means draining the retry queue should stop.
                let mut send_filtered = |envelope: Envelope,
                                         rl: &mut RateLimiter,
                                         retry_queue: &mut VecDeque<Envelope>|
                 -> bool {
                    let mut keep_for_retry = |retry_queue: &mut VecDeque<Envelope>, envelope| {
                        if retry_buffer > 0 {
                            if retry_queue.len() >= retry_buffer {
                                retry_queue.pop_front();
                            }
                            retry_queue.push_back(envelope);
                        }
                    };
                    if let Some(time_left) = rl.is_disabled(RateLimitingCategory::Any) {
                        flare_debug!(
                            "Skipping event send because we're disabled due to rate limits for {}s",
                            time_left.as_secs()
                        );
                        keep_for_retry(retry_queue, envelope);
                        return false;
                    }
                    let Some(envelope) = rl.filter_envelope(envelope) else {
                        flare_debug!("Envelope was discarded due to per-item rate limits");
                        return true;
                    };
                    match send(&envelope, rl) {
                        SendOutcome::Success => true,
                        SendOutcome::RateLimited(_) | SendOutcome::Failure => {
                            keep_for_retry(retry_queue, envelope);
                            false
                        }
                    }
                };

                for task in receiver.into_iter() {
                    if shutdown_worker.load(Ordering::SeqCst) {
                        if let Task::Flush(sender) = task {
                            sender.send(()).ok();
                        }
                        return;
                    }
                    match task {
                        Task::SendEnvelope(envelope) => {
                            while rl.is_disabled(RateLimitingCategory::Any).is_none() {
                                let Some(queued) = retry_queue.pop_front() else {
                                    break;
                                };
                                if !send_filtered(queued, &mut rl, &mut retry_queue) {
                                    break;
                                }
                            }
                            send_filtered(envelope, &mut rl, &mut retry_queue);
                        }
                        Task::Flush(sender) => {
                            while rl.is_disabled(RateLimitingCategory::Any).is_none() {
                                let Some(queued) = retry_queue.pop_front() else {
                                    break;
                                };
                                if !send_filtered(queued, &mut rl, &mut retry_queue) {
                                    break;
                                }
                            }
                            sender.send(()).ok();
                        }
                        Task::Shutdown => return,
                    }
                }
            })
            .ok();

        Self {
            sender,
            shutdown,
            handle,
        }
    }

    pub fn send(&self, envelope: Envelope) {
        // Only log, and avoid panicking on a full channel
        if let Err(err) = self.sender.try_send(Task::SendEnvelope(envelope)) {
            flare_debug!("envelope dropped: {err}");
        }
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        let (sender, receiver) = sync_channel(1);
        let _ = self.sender.send(Task::Flush(sender));

        receiver.recv_timeout(timeout).is_ok()
    }
}

impl Drop for TransportThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.sender.send(Task::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}
