use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    beacon_debug, beacon_warn, Beacon, ClientInfoProvider, Configuration, Database, Uploader,
};

use crate::worker::UploadWorker;

/// Helper struct that is returned from `init`.
///
/// When this is dropped the context shuts down, which submits the pings
/// marked for shutdown, and queued pings are uploaded within the configured
/// shutdown timeout (2 seconds by default). Pings that do not make it stay
/// queued for the next run.
#[must_use = "when the init guard is dropped the upload worker is shut down and no further \
              pings are uploaded. If you do want to ignore this use mem::forget on it."]
pub struct BeaconGuard {
    beacon: Option<Arc<Beacon>>,
    worker: Option<UploadWorker>,
    client_info: Arc<dyn ClientInfoProvider>,
    uploader: Arc<dyn Uploader>,
}

impl BeaconGuard {
    /// Quick check if the context was initialized.
    pub fn is_enabled(&self) -> bool {
        self.beacon.is_some()
    }

    /// The context, unless initialization failed.
    pub fn beacon(&self) -> Option<&Arc<Beacon>> {
        self.beacon.as_ref()
    }

    /// Assembles a registered ping on the upload worker.
    pub fn submit_ping(&self, ping_name: &str, reason: Option<&str>) {
        match self.worker {
            Some(ref worker) => worker.submit(ping_name, reason),
            None => beacon_debug!("[Beacon] not initialized, dropping {} ping", ping_name),
        }
    }

    /// Uploads everything that is eligible now.
    ///
    /// Returns `false` if that did not finish within `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        match self.worker {
            Some(ref worker) => worker.flush(timeout),
            None => true,
        }
    }

    /// Tears the context down and starts over with empty storage.
    ///
    /// Meant for tests: everything stored under the old data path and
    /// everything still queued is lost.
    pub fn test_reset(&mut self, configuration: Configuration) {
        self.close();
        self.beacon = None;
        if let Err(err) = Database::destroy(&configuration.data_path) {
            beacon_warn!("[Beacon] failed to clear storage: {}", err);
        }
        let client_info = self.client_info.clone();
        let (beacon, worker) = start(
            configuration,
            move || client_info.client_info(),
            self.uploader.clone(),
        );
        self.beacon = beacon;
        self.worker = worker;
    }

    fn close(&mut self) {
        let timeout = match self.beacon {
            Some(ref beacon) => {
                beacon.shutdown();
                beacon.configuration().shutdown_timeout
            }
            None => Duration::ZERO,
        };
        if let Some(worker) = self.worker.take() {
            if !worker.flush(timeout) {
                beacon_debug!("[Beacon] pending pings stay queued for the next run");
            }
        }
    }
}

impl Drop for BeaconGuard {
    fn drop(&mut self) {
        if self.is_enabled() {
            beacon_debug!("dropping beacon guard -> shutting down");
        } else {
            beacon_debug!("dropping beacon guard (no context to shut down)");
        }
        self.close();
    }
}

fn start<P, U>(
    configuration: Configuration,
    client_info: P,
    uploader: U,
) -> (Option<Arc<Beacon>>, Option<UploadWorker>)
where
    P: ClientInfoProvider + 'static,
    U: Uploader,
{
    let beacon = match Beacon::new(configuration, client_info) {
        Ok(beacon) => Arc::new(beacon),
        Err(err) => {
            beacon_warn!("[Beacon] not starting: {}", err);
            return (None, None);
        }
    };
    if let Err(err) = beacon.initialize() {
        beacon_warn!("[Beacon] failed to initialize: {}", err);
        return (None, None);
    }
    let worker = UploadWorker::new(beacon.clone(), uploader);
    (Some(beacon), Some(worker))
}

/// Creates and initializes the telemetry context and starts uploading.
///
/// This returns a guard that must be kept in scope; while it lives a
/// background thread uploads queued pings through `uploader` and submits
/// interval pings when they are due. When the guard is dropped the context
/// shuts down.
///
/// If the configuration is invalid or the storage cannot be opened, the
/// failure is logged and a disabled guard is returned; the application
/// keeps running without telemetry.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
///
/// use beacon::upload::UploadOutcome;
/// use beacon::{ClientInfoMetrics, Configuration, Url};
///
/// struct NoopUploader;
///
/// impl beacon::Uploader for NoopUploader {
///     fn upload(&self, _: &Url, _: &[u8], _: &BTreeMap<String, String>) -> UploadOutcome {
///         UploadOutcome::Success
///     }
/// }
///
/// let dir = tempfile::tempdir().unwrap();
/// let guard = beacon::init(
///     Configuration::new(dir.path(), "org.example.app"),
///     ClientInfoMetrics::unknown(),
///     NoopUploader,
/// );
/// assert!(guard.is_enabled());
/// ```
pub fn init<P, U>(configuration: Configuration, client_info: P, uploader: U) -> BeaconGuard
where
    P: ClientInfoProvider + 'static,
    U: Uploader,
{
    let client_info: Arc<dyn ClientInfoProvider> = Arc::new(client_info);
    let uploader: Arc<dyn Uploader> = Arc::new(uploader);
    let application_id = configuration.application_id.clone();

    let provider = client_info.clone();
    let (beacon, worker) = start(configuration, move || provider.client_info(), uploader.clone());
    if beacon.is_some() {
        beacon_debug!("enabled beacon for {}", application_id);
    } else {
        beacon_debug!("initialized disabled beacon for {}", application_id);
    }

    BeaconGuard {
        beacon,
        worker,
        client_info,
        uploader,
    }
}

