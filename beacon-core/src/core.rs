use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use crate::client_info::ClientInfoProvider;
use crate::constants::{
    DELETION_REQUEST_PING_NAME, EVENTS_PING_NAME, KNOWN_CLIENT_ID, METRICS_PING_NAME,
};
use crate::database::{events, meta, metrics, Database};
use crate::internal_metrics;
use crate::lifecycle::{Admission, LifecycleManager, State};
use crate::ping::{
    PingAssembler, PingType, REASON_MAX_CAPACITY, REASON_SCHEDULED, REASON_SHUTDOWN,
    REASON_STARTUP, REASON_UPLOAD_DISABLED,
};
use crate::protocol::{CommonMetricData, Metric, PingRequest, RecordedEvent, TimeUnit};
use crate::scheduler::Scheduler;
use crate::types::{format_datetime, local_now_with_offset, random_uuid, Uuid};
use crate::upload::{EnqueueOutcome, Partition, PingUploadTask, UploadManager, UploadOutcome};
use crate::{beacon_debug, beacon_warn, Configuration, Error, Result};

type UploadTrigger = Arc<dyn Fn() + Send + Sync>;

/// The telemetry context.
///
/// A `Beacon` owns the metric store, the lifecycle state, the ping registry,
/// the upload manager and the scheduler. It is constructed explicitly and
/// passed by reference to every operation; there is no process wide
/// instance.
///
/// Recording and submission never fail towards the caller. Records made
/// before [`Beacon::initialize`] are buffered and replayed, records made
/// after [`Beacon::shutdown`] are dropped.
///
/// # Examples
///
/// ```
/// use beacon_core::{Beacon, ClientInfoMetrics, Configuration};
///
/// let dir = tempfile::tempdir().unwrap();
/// let beacon = Beacon::new(
///     Configuration::new(dir.path(), "org.example.app"),
///     ClientInfoMetrics::unknown(),
/// )
/// .unwrap();
/// beacon.initialize().unwrap();
/// assert!(beacon.is_upload_enabled());
/// ```
pub struct Beacon {
    configuration: Configuration,
    client_info: Box<dyn ClientInfoProvider>,
    lifecycle: LifecycleManager,
    database: OnceLock<Database>,
    upload_manager: UploadManager,
    scheduler: Scheduler,
    assembler: PingAssembler,
    pings: RwLock<BTreeMap<String, PingType>>,
    upload_enabled: AtomicBool,
    upload_trigger: RwLock<Option<UploadTrigger>>,
    start_time: DateTime<FixedOffset>,
    run_id: Uuid,
}

impl fmt::Debug for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Beacon")
            .field("application_id", &self.configuration.application_id)
            .field("state", &self.lifecycle.state())
            .field("upload_enabled", &self.is_upload_enabled())
            .field("database", &self.database.get())
            .finish()
    }
}

impl Beacon {
    /// Creates an uninitialized context.
    ///
    /// The built-in `metrics`, `events` and `deletion-request` pings are
    /// registered. Storage is opened by [`Beacon::initialize`].
    pub fn new<P>(configuration: Configuration, client_info: P) -> Result<Beacon>
    where
        P: ClientInfoProvider + 'static,
    {
        configuration.validate()?;
        beacon_debug!(
            "[Beacon] creating context for {} in {}",
            configuration.application_id,
            configuration.data_path.display()
        );

        let upload_manager = UploadManager::new(configuration.upload_policy.clone());
        upload_manager.set_diagnostics_enabled(configuration.upload_enabled);
        let beacon = Beacon {
            upload_enabled: AtomicBool::new(configuration.upload_enabled),
            client_info: Box::new(client_info),
            lifecycle: LifecycleManager::new(),
            database: OnceLock::new(),
            upload_manager,
            scheduler: Scheduler::new(),
            assembler: PingAssembler::new(),
            pings: RwLock::new(BTreeMap::new()),
            upload_trigger: RwLock::new(None),
            start_time: local_now_with_offset(),
            run_id: random_uuid(),
            configuration,
        };

        let interval = beacon.configuration.metrics_ping_interval;
        beacon.register_ping_type(PingType::new(METRICS_PING_NAME, true, false).with_interval(interval));
        beacon.register_ping_type(PingType::new(EVENTS_PING_NAME, true, false).with_submit_on_shutdown());
        beacon.register_ping_type(PingType::new(DELETION_REQUEST_PING_NAME, true, true));
        Ok(beacon)
    }

    /// Opens storage and moves the context to `Active`.
    ///
    /// At startup in-flight uploads of a previous run are reverted to
    /// pending, Application lifetime values of a previous run are cleared,
    /// events left over from a previous run are submitted and the buffered
    /// records are replayed. Calling this twice is a no-op.
    pub fn initialize(&self) -> Result<()> {
        if self.database.get().is_some() {
            return Ok(());
        }
        let database = Database::new(&self.configuration.data_path)?;
        if self.database.set(database).is_err() {
            return Ok(());
        }
        let db = self.database().ok_or(Error::NotInitialized)?;

        self.upload_manager.revert_in_flight(db)?;
        let enabled = self.is_upload_enabled();
        let opted_out_while_stopped = db.write(|tx| {
            self.lifecycle.on_startup(tx, &self.run_id)?;
            if meta::get(tx, meta::FIRST_RUN_DATE)?.is_none() {
                let first_run = format_datetime(&self.start_time, TimeUnit::Day);
                meta::set(tx, meta::FIRST_RUN_DATE, &first_run)?;
            }
            let client_id = meta::get(tx, meta::CLIENT_ID)?;
            let is_canary = client_id.as_deref() == Some(KNOWN_CLIENT_ID);
            match (enabled, client_id) {
                (true, None) => meta::set(tx, meta::CLIENT_ID, &random_uuid().to_string())?,
                (true, Some(_)) if is_canary => {
                    meta::set(tx, meta::CLIENT_ID, &random_uuid().to_string())?
                }
                (false, None) => meta::set(tx, meta::CLIENT_ID, KNOWN_CLIENT_ID)?,
                (false, Some(_)) if !is_canary => return Ok(true),
                _ => {}
            }
            Ok(false)
        })?;

        if opted_out_while_stopped {
            beacon_debug!("[Beacon] upload was disabled since the last run");
            self.on_upload_disabled();
        }

        let leftover = db.read(|conn| events::storages(conn))?;
        for storage in leftover {
            if let Some(ping) = self.ping_type(&storage) {
                self.submit_ping_sync(&ping, Some(REASON_STARTUP), false);
            }
        }

        let overflowed = self.lifecycle.activate(self);
        if overflowed > 0 {
            beacon_warn!("[Beacon] {} records made before initialization were dropped", overflowed);
            if self.is_upload_enabled() {
                let meta = internal_metrics::preinit_tasks_overflow();
                let amount = i32::try_from(overflowed).unwrap_or(i32::MAX);
                db.write(|tx| internal_metrics::add_to_counter(tx, &meta, amount))?;
            }
        }

        beacon_debug!("[Beacon] initialized, run {}", self.run_id);
        Ok(())
    }

    /// The configuration the context was created with.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The storage, once initialized.
    pub fn database(&self) -> Option<&Database> {
        self.database.get()
    }

    /// Runs `f` against the storage, failing if it is not open yet.
    pub fn with_database<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        match self.database.get() {
            Some(db) => f(db),
            None => Err(Error::NotInitialized),
        }
    }

    /// The upload manager.
    pub fn upload_manager(&self) -> &UploadManager {
        &self.upload_manager
    }

    pub(crate) fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub(crate) fn client_info_provider(&self) -> &dyn ClientInfoProvider {
        self.client_info.as_ref()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// When this context was created; the start of the first ping window.
    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    /// Whether upload, and thus recording, is enabled.
    pub fn is_upload_enabled(&self) -> bool {
        self.upload_enabled.load(Ordering::SeqCst)
    }

    /// Whether a record to the metric described by `meta` is kept.
    pub fn should_record(&self, meta: &CommonMetricData) -> bool {
        !meta.disabled && self.is_upload_enabled()
    }

    /// Registers a function called whenever a ping was queued.
    ///
    /// The upload loop uses it to wake up.
    pub fn set_upload_trigger<F>(&self, trigger: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut slot = self
            .upload_trigger
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(trigger));
    }

    fn trigger_upload(&self) {
        let trigger = self
            .upload_trigger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(trigger) = trigger {
            trigger();
        }
    }

    /// Runs an operation now, buffers it before initialization or drops it
    /// during shutdown.
    pub(crate) fn launch<F>(&self, task: F)
    where
        F: FnOnce(&Beacon) + Send + 'static,
    {
        match self.lifecycle.admit(Box::new(task)) {
            Admission::Run(task) => task(self),
            Admission::Buffered => {}
            Admission::Rejected => beacon_debug!("[Beacon] dropping operation, not accepting records"),
        }
    }

    /// Overwrites the value of a metric.
    pub fn record(&self, meta: &CommonMetricData, value: Metric) {
        let meta = meta.clone();
        self.launch(move |beacon| beacon.record_sync(&meta, &value));
    }

    pub(crate) fn record_sync(&self, meta: &CommonMetricData, value: &Metric) {
        if !self.should_record(meta) {
            return;
        }
        if let Err(err) = self.with_database(|db| db.record(meta, value)) {
            beacon_warn!("[Beacon] failed to record {}: {}", meta.identifier(), err);
        }
    }

    pub(crate) fn record_with_sync<F>(&self, meta: &CommonMetricData, transform: F)
    where
        F: FnMut(Option<Metric>) -> Metric,
    {
        if !self.should_record(meta) {
            return;
        }
        if let Err(err) = self.with_database(|db| db.record_with(meta, transform)) {
            beacon_warn!("[Beacon] failed to record {}: {}", meta.identifier(), err);
        }
    }

    /// Appends an event; submits pings whose event buffer is full.
    pub(crate) fn record_event_sync(&self, meta: &CommonMetricData, event: RecordedEvent) {
        if !self.should_record(meta) {
            return;
        }
        let max_events = self.configuration.max_events;
        let full = self.with_database(|db| {
            db.write(|tx| events::record(tx, &meta.send_in_pings, &event, max_events))
        });
        match full {
            Ok(full) => {
                for storage in full {
                    if let Some(ping) = self.ping_type(&storage) {
                        self.submit_ping_sync(&ping, Some(REASON_MAX_CAPACITY), false);
                    }
                }
            }
            Err(err) => beacon_warn!("[Beacon] failed to record {}: {}", meta.identifier(), err),
        }
    }

    /// Registers (or replaces) a ping type.
    pub fn register_ping_type(&self, ping: PingType) {
        beacon_debug!("[Beacon] registering ping {}", ping.name);
        self.pings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ping.name.clone(), ping);
    }

    /// Looks up a registered ping type.
    pub fn ping_type(&self, name: &str) -> Option<PingType> {
        self.pings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn registered_pings(&self) -> Vec<PingType> {
        self.pings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Requests assembly of a ping. See [`PingType::submit`].
    pub fn submit_ping(&self, ping: &PingType, reason: Option<&str>) {
        let ping = ping.clone();
        let reason = reason.map(str::to_owned);
        self.launch(move |beacon| {
            beacon.submit_ping_sync(&ping, reason.as_deref(), true);
        });
    }

    /// Requests assembly of a registered ping by its name.
    pub fn submit_ping_by_name(&self, ping_name: &str, reason: Option<&str>) {
        match self.ping_type(ping_name) {
            Some(ping) => self.submit_ping(&ping, reason),
            None => beacon_warn!("[Beacon] cannot submit unknown ping {}", ping_name),
        }
    }

    /// Assembles and queues a ping in one transaction.
    ///
    /// Returns whether a ping was queued. With `coalesce` nothing is
    /// assembled while an earlier ping of the same type is still queued.
    pub(crate) fn submit_ping_sync(&self, ping: &PingType, reason: Option<&str>, coalesce: bool) -> bool {
        if !self.is_upload_enabled() {
            beacon_debug!("[Beacon] upload disabled, not submitting {}", ping.name);
            return false;
        }

        let document_id = random_uuid();
        let now = local_now_with_offset();
        let result = self.with_database(|db| {
            db.write(|tx| {
                if coalesce && !self.scheduler.should_assemble(tx, &ping.name)? {
                    return Ok(None);
                }
                match self.assembler.collect(self, tx, ping, reason, document_id, now)? {
                    Some(request) => self
                        .upload_manager
                        .enqueue_in(tx, &request, Partition::Regular)
                        .map(Some),
                    None => Ok(None),
                }
            })
        });

        match result {
            Ok(Some(EnqueueOutcome::Queued { .. })) => {
                self.scheduler.mark_outstanding(&ping.name, document_id);
                self.trigger_upload();
                true
            }
            Ok(_) => false,
            Err(err) => {
                beacon_warn!("[Beacon] failed to submit {} ping: {}", ping.name, err);
                false
            }
        }
    }

    /// Enables or disables upload.
    ///
    /// Disabling takes effect immediately: recording stops, a
    /// deletion-request ping carrying the current client id is queued, every
    /// other queued ping and all recorded data are dropped and the client id
    /// is replaced by a fixed placeholder. Enabling again starts over with a
    /// fresh client id.
    pub fn set_upload_enabled(&self, enabled: bool) {
        if self.upload_enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        beacon_debug!("[Beacon] upload enabled: {}", enabled);
        self.upload_manager.set_diagnostics_enabled(enabled);
        if self.database.get().is_none() {
            // initialize reconciles the stored client id with the flag
            return;
        }
        if enabled {
            self.on_upload_enabled();
        } else {
            self.on_upload_disabled();
        }
    }

    fn on_upload_enabled(&self) {
        let result = self.with_database(|db| {
            db.write(|tx| meta::set(tx, meta::CLIENT_ID, &random_uuid().to_string()))
        });
        if let Err(err) = result {
            beacon_warn!("[Beacon] failed to enable upload: {}", err);
        }
    }

    fn on_upload_disabled(&self) {
        let ping = self
            .ping_type(DELETION_REQUEST_PING_NAME)
            .unwrap_or_else(|| PingType::new(DELETION_REQUEST_PING_NAME, true, true));
        let document_id = random_uuid();
        let now = local_now_with_offset();

        let result = self.with_database(|db| {
            db.write(|tx| {
                let request = self.assembler.collect(
                    self,
                    tx,
                    &ping,
                    Some(REASON_UPLOAD_DISABLED),
                    document_id,
                    now,
                )?;
                if let Some(ref request) = request {
                    self.upload_manager
                        .enqueue_in(tx, request, Partition::DeletionRequest)?;
                }
                self.upload_manager.purge_in(tx)?;
                metrics::clear_all(tx)?;
                events::clear_all(tx)?;
                meta::set(tx, meta::CLIENT_ID, KNOWN_CLIENT_ID)?;
                Ok(request.is_some())
            })
        });
        self.scheduler.reset();

        match result {
            Ok(true) => self.trigger_upload(),
            Ok(false) => {}
            Err(err) => beacon_warn!("[Beacon] failed to apply opt-out: {}", err),
        }
    }

    /// Drops all User lifetime data and starts a new client identity.
    pub fn reset_user_data(&self) {
        let client_id = if self.is_upload_enabled() {
            random_uuid().to_string()
        } else {
            KNOWN_CLIENT_ID.to_owned()
        };
        let first_run = format_datetime(&local_now_with_offset(), TimeUnit::Day);
        let result = self.with_database(|db| {
            db.write(|tx| {
                self.lifecycle.on_user_reset(tx)?;
                meta::set(tx, meta::CLIENT_ID, &client_id)?;
                meta::set(tx, meta::FIRST_RUN_DATE, &first_run)?;
                Ok(())
            })
        });
        if let Err(err) = result {
            beacon_warn!("[Beacon] failed to reset user data: {}", err);
        }
    }

    /// Submits the interval pings that are due.
    ///
    /// Returns the time until the next one becomes due, for the caller's
    /// timer.
    pub fn tick(&self) -> Option<Duration> {
        if self.lifecycle.state() != State::Active {
            return None;
        }
        let pings = self.registered_pings();
        let now = local_now_with_offset();
        let schedule = self.with_database(|db| {
            db.write(|tx| self.scheduler.due_pings(tx, &pings, now))
        });
        let (due, next) = match schedule {
            Ok(schedule) => schedule,
            Err(err) => {
                beacon_warn!("[Beacon] failed to read ping schedules: {}", err);
                return None;
            }
        };
        for name in due {
            if let Some(ping) = self.ping_type(&name) {
                self.submit_ping_sync(&ping, Some(REASON_SCHEDULED), true);
            }
        }
        next
    }

    /// The next thing the upload loop should do.
    pub fn get_upload_task(&self) -> PingUploadTask {
        match self.database.get() {
            Some(db) => self.upload_manager.get_upload_task(db),
            None => PingUploadTask::Done,
        }
    }

    /// Reports the outcome of an upload.
    pub fn process_upload_response(&self, document_id: &Uuid, outcome: UploadOutcome) {
        if let Some(db) = self.database.get() {
            self.upload_manager
                .process_upload_response(db, document_id, outcome);
        }
    }

    /// Stops accepting records and submits the pings marked for shutdown.
    ///
    /// Queued pings stay queued; the host's upload loop may drain them
    /// before the process exits.
    pub fn shutdown(&self) {
        if self.lifecycle.state() != State::Active {
            return;
        }
        beacon_debug!("[Beacon] shutting down");
        for ping in self.registered_pings() {
            if ping.submit_on_shutdown {
                self.submit_ping_sync(&ping, Some(REASON_SHUTDOWN), true);
            }
        }
        self.lifecycle.begin_shutdown();
    }

    /// The queued pings, oldest first, without deletion-requests.
    pub fn test_get_pending_pings(&self) -> Result<Vec<PingRequest>> {
        self.with_database(|db| self.upload_manager.queued_requests(db, Partition::Regular))
    }

    /// The queued deletion-request pings.
    pub fn test_get_deletion_requests(&self) -> Result<Vec<PingRequest>> {
        self.with_database(|db| {
            self.upload_manager
                .queued_requests(db, Partition::DeletionRequest)
        })
    }

    /// The stored client id.
    pub fn test_get_client_id(&self) -> Result<Option<String>> {
        self.with_database(|db| db.read(|conn| meta::get(conn, meta::CLIENT_ID)))
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        beacon_debug!("[Beacon] dropping context for {}", self.configuration.application_id);
    }
}
