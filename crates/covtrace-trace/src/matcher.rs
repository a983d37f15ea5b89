// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The trace job: validation, population paging and per-candidate scans.

use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use covtrace_config::model::TraceConfig;
use covtrace_core::{
    ContactRecord, CovtraceError, DurableStore, EphemeralStore, InfectionStatus, OperationKind,
    OperationStore, UserFilter, UserRecord,
};
use covtrace_notify::NotificationService;
use covtrace_presence::PresenceStore;

use crate::missed::{MissedDay, MissedDaySink};

/// Source of "today" (UTC) for date-range validation and the scan end.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| Utc::now().date_naive())
}

#[derive(Clone)]
pub struct ContactMatcher {
    durable: Arc<dyn DurableStore>,
    presence: Arc<PresenceStore>,
    notifier: NotificationService,
    operations: OperationStore,
    page_size: u64,
    concurrency: usize,
    missed: MissedDaySink,
    missed_rx: Arc<Mutex<Option<mpsc::Receiver<MissedDay>>>>,
    clock: Clock,
    tasks: TaskTracker,
}

/// A trace run after validation.
struct TraceJob {
    operation_id: String,
    patient: String,
    since: NaiveDate,
    until: NaiveDate,
}

impl ContactMatcher {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        presence: Arc<PresenceStore>,
        notifier: NotificationService,
        config: &TraceConfig,
    ) -> Self {
        let (missed, missed_rx) =
            MissedDaySink::channel(config.missed_day_capacity, config.missed_day_timeout());
        Self {
            durable,
            presence,
            notifier,
            operations: OperationStore::new(ephemeral, config.operation_ttl()),
            page_size: config.page_size.max(1),
            concurrency: config.concurrency.max(1),
            missed,
            missed_rx: Arc::new(Mutex::new(Some(missed_rx))),
            clock: system_clock(),
            tasks: TaskTracker::new(),
        }
    }

    /// Replaces the source of "today".
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Takes the receiving half of the missed-day side channel (first call only).
    pub async fn take_missed_days(&self) -> Option<mpsc::Receiver<MissedDay>> {
        self.missed_rx.lock().await.take()
    }

    /// Validates the request and starts a trace job in the background.
    ///
    /// The patient must exist and be `POSITIVE`, and `since` must be before
    /// today. Returns the operation id to poll.
    pub async fn start(&self, patient_phone: &str, since: NaiveDate) -> Result<String, CovtraceError> {
        if patient_phone.trim().is_empty() {
            return Err(CovtraceError::InvalidArgument("patient phone is required".into()));
        }
        let patient = self
            .durable
            .get_user(patient_phone)
            .await?
            .ok_or_else(|| CovtraceError::not_found("user", patient_phone))?;
        if patient.infection_status != InfectionStatus::Positive {
            return Err(CovtraceError::FailedPrecondition(format!(
                "user {patient_phone} is {}, only POSITIVE users can be traced",
                patient.infection_status
            )));
        }
        let today = (self.clock)();
        if since >= today {
            return Err(CovtraceError::FailedPrecondition(format!(
                "since date {since} must be before {today}"
            )));
        }

        let op = self.operations.create(OperationKind::Trace).await?;
        let job = TraceJob {
            operation_id: op.id.clone(),
            patient: patient.phone_number,
            since,
            until: today,
        };
        let matcher = self.clone();
        self.tasks.spawn(async move { matcher.run(job).await });

        info!(operation_id = %op.id, patient = patient_phone, %since, "trace job started");
        Ok(op.id)
    }

    /// Scans one candidate against the patient from `since` to `until`
    /// inclusive. Unreadable days go to the side channel and are skipped.
    pub async fn scan_contact(
        &self,
        patient_phone: &str,
        candidate: &UserRecord,
        since: NaiveDate,
        until: NaiveDate,
    ) -> ContactRecord {
        scan(
            &self.presence,
            &self.missed,
            None,
            patient_phone,
            candidate,
            since,
            until,
        )
        .await
    }

    /// Waits for running trace jobs to finish.
    pub async fn close(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    async fn run(&self, job: TraceJob) {
        let started = Instant::now();
        let id = job.operation_id.as_str();

        let alerts = match self.notifier.open_alert_stream() {
            Ok(tx) => tx,
            Err(e) => {
                error!(operation_id = id, error = %e, "no alert stream, trace job failed");
                self.finish_failed(id, &e, started).await;
                return;
            }
        };
        if let Err(e) = self.operations.mark_running(id).await {
            error!(operation_id = id, error = %e, "cannot mark trace job running");
            return;
        }

        match self.scan_population(&job, &alerts).await {
            Ok((scanned, contacts)) => {
                covtrace_prometheus::record_trace_job("done", started.elapsed().as_secs_f64());
                covtrace_prometheus::record_contacts_found(contacts);
                if let Err(e) = self.operations.complete(id).await {
                    error!(operation_id = id, error = %e, "trace job finished but state not saved");
                    return;
                }
                info!(
                    operation_id = id,
                    scanned,
                    contacts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "trace job finished"
                );
            }
            Err(e) => {
                error!(operation_id = id, error = %e, "trace job failed");
                self.finish_failed(id, &e, started).await;
            }
        }
    }

    async fn finish_failed(&self, id: &str, e: &CovtraceError, started: Instant) {
        covtrace_prometheus::record_trace_job("failed", started.elapsed().as_secs_f64());
        if let Err(save) = self.operations.fail(id, e.to_string()).await {
            error!(operation_id = id, error = %save, "trace failure state not saved");
        }
    }

    /// Pages through every user but the patient. Returns `(scanned, contacts)`.
    async fn scan_population(
        &self,
        job: &TraceJob,
        alerts: &mpsc::Sender<ContactRecord>,
    ) -> Result<(u64, u64), CovtraceError> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut offset = 0u64;
        let (mut scanned, mut contacts) = (0u64, 0u64);

        loop {
            let page = self
                .durable
                .list_users(&[UserFilter::All], offset, self.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len() as u64;

            let mut scans = JoinSet::new();
            for candidate in page {
                if candidate.phone_number == job.patient {
                    continue;
                }
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| CovtraceError::Internal(e.to_string()))?;
                let presence = self.presence.clone();
                let missed = self.missed.clone();
                let alerts = alerts.clone();
                let (op, patient) = (job.operation_id.clone(), job.patient.clone());
                let (since, until) = (job.since, job.until);
                scans.spawn(async move {
                    let record = scan(
                        &presence,
                        &missed,
                        Some(op.as_str()),
                        &patient,
                        &candidate,
                        since,
                        until,
                    )
                    .await;
                    drop(permit);
                    let found = record.count > 0;
                    if alerts.send(record).await.is_err() {
                        warn!(operation_id = %op, "alert stream closed, contact record dropped");
                    }
                    found
                });
            }

            while let Some(joined) = scans.join_next().await {
                match joined {
                    Ok(found) => {
                        scanned += 1;
                        contacts += u64::from(found);
                    }
                    Err(e) => error!(operation_id = %job.operation_id, error = %e, "candidate scan panicked"),
                }
            }
            if let Err(e) = self.operations.set_progress(&job.operation_id, scanned).await {
                warn!(operation_id = %job.operation_id, error = %e, "trace progress not saved");
            }

            offset += fetched;
            if fetched < self.page_size {
                break;
            }
        }
        Ok((scanned, contacts))
    }
}

/// Walks the date range in order, accumulating shared presence tokens.
async fn scan(
    presence: &PresenceStore,
    missed: &MissedDaySink,
    operation_id: Option<&str>,
    patient: &str,
    candidate: &UserRecord,
    since: NaiveDate,
    until: NaiveDate,
) -> ContactRecord {
    let mut record = ContactRecord {
        patient_phone: patient.to_string(),
        contact_phone: candidate.phone_number.clone(),
        device_token: candidate.device_token.clone(),
        count: 0,
        contact_points: Vec::new(),
    };

    for date in since.iter_days().take_while(|d| *d <= until) {
        match presence.overlap(patient, &candidate.phone_number, date).await {
            Ok(overlap) => {
                record.count += overlap.count();
                record.contact_points.extend(overlap.shared);
            }
            Err(e) => {
                warn!(contact = %candidate.phone_number, %date, error = %e, "day skipped");
                missed
                    .report(MissedDay {
                        operation_id: operation_id.map(str::to_string),
                        phone: candidate.phone_number.clone(),
                        date,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    debug!(contact = %record.contact_phone, count = record.count, "candidate scanned");
    record
}
