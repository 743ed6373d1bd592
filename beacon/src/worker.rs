use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use beacon_core::upload::{PingUploadTask, UploadOutcome};
use beacon_core::{beacon_debug, beacon_warn, Beacon, Uploader};

/// How long the worker sleeps when neither an upload nor a ping is due.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

enum Task {
    /// A ping was queued; look for uploads.
    Trigger,
    /// Assemble a ping on the worker.
    Submit {
        ping_name: String,
        reason: Option<String>,
    },
    Flush(SyncSender<()>),
    Shutdown,
}

/// Drives the upload protocol of a [`Beacon`] on a background thread.
///
/// The worker wakes up when a ping was queued, when a backoff or rate limit
/// wait ran out and when an interval ping becomes due.
pub(crate) struct UploadWorker {
    sender: SyncSender<Task>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UploadWorker {
    pub fn new<U: Uploader>(beacon: Arc<Beacon>, uploader: U) -> Self {
        let (sender, receiver) = sync_channel(30);
        let shutdown = Arc::new(AtomicBool::new(false));

        let trigger = sender.clone();
        beacon.set_upload_trigger(move || {
            // a full channel already holds a wake-up
            let _ = trigger.try_send(Task::Trigger);
        });

        let shutdown_worker = shutdown.clone();
        let handle = thread::Builder::new()
            .name("beacon-upload".into())
            .spawn(move || run(&beacon, &uploader, &receiver, &shutdown_worker))
            .map_err(|err| beacon_warn!("[UploadWorker] failed to spawn: {}", err))
            .ok();

        Self {
            sender,
            shutdown,
            handle,
        }
    }

    /// Assembles a ping on the worker thread.
    pub fn submit(&self, ping_name: &str, reason: Option<&str>) {
        let _ = self.sender.send(Task::Submit {
            ping_name: ping_name.to_owned(),
            reason: reason.map(str::to_owned),
        });
    }

    /// Uploads what is eligible now. Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (sender, receiver) = sync_channel(1);
        let _ = self.sender.send(Task::Flush(sender));
        receiver.recv_timeout(timeout).is_ok()
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.sender.send(Task::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                beacon_warn!("[UploadWorker] worker thread panicked");
            }
        }
    }
}

fn run<U: Uploader>(
    beacon: &Beacon,
    uploader: &U,
    receiver: &Receiver<Task>,
    shutdown: &AtomicBool,
) {
    let mut next_tick = Instant::now() + beacon.tick().unwrap_or(IDLE_TIMEOUT);

    loop {
        let wait = drain(beacon, uploader, shutdown);
        let now = Instant::now();
        let timeout = next_tick
            .saturating_duration_since(now)
            .min(wait.unwrap_or(IDLE_TIMEOUT));

        match receiver.recv_timeout(timeout) {
            Ok(Task::Trigger) => {}
            Ok(Task::Submit { ping_name, reason }) => {
                beacon.submit_ping_by_name(&ping_name, reason.as_deref());
            }
            Ok(Task::Flush(reply)) => {
                drain(beacon, uploader, shutdown);
                reply.send(()).ok();
            }
            Ok(Task::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        if now >= next_tick {
            next_tick = now + beacon.tick().unwrap_or(IDLE_TIMEOUT);
        }
    }
}

/// Uploads until the queue is empty or has to wait. Returns the wait.
fn drain<U: Uploader>(beacon: &Beacon, uploader: &U, shutdown: &AtomicBool) -> Option<Duration> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return None;
        }
        let task = match beacon.get_upload_task() {
            PingUploadTask::Upload(task) => task,
            PingUploadTask::Wait(wait) => return Some(wait),
            PingUploadTask::Done => return None,
        };

        let request = &task.request;
        let outcome = match request.url(&beacon.configuration().server_endpoint) {
            Ok(url) => {
                beacon_debug!("[UploadWorker] uploading {} ping to {}", request.ping_name, url);
                uploader.upload(&url, request.body.as_bytes(), &request.headers)
            }
            Err(err) => {
                beacon_warn!(
                    "[UploadWorker] invalid upload url for {}: {}",
                    request.document_id,
                    err
                );
                UploadOutcome::UnrecoverableFailure
            }
        };
        beacon.process_upload_response(&request.document_id, outcome);
    }
}
