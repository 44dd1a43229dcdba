//! RecordInjector: writes a compiled timeline to the device, one record at a time.
//!
//! Each event becomes an [`InjectionRecord`], is written through the
//! [`DeviceLink`], and is immediately read back. Per-record failures are
//! collected in the [`InjectionBatch`]; they never stop the batch. Only a
//! cleared running flag does, between records.

pub mod catalog;
pub mod record;

pub use catalog::Catalog;
pub use record::{InjectionRecord, MmsAddress, MmsPart, MmsPlan, RecordBuilder};

use crate::config::InjectionConfig;
use crate::device::content::insert_command;
use crate::device::{ContentQuery, DeviceLink};
use crate::directory::CharacterDirectory;
use crate::error::{Error, Result};
use crate::provider::ProviderBindings;
use crate::types::{RecordKind, TimelineEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one write/verify pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionResult {
    pub seq: usize,
    pub kind: RecordKind,
    /// URI written to; `None` when the kind was unbound
    pub uri: Option<String>,
    pub address: String,
    /// Millisecond epoch
    pub timestamp: i64,
    /// The device accepted the write
    pub success: bool,
    /// The read-back found the row
    pub verified: bool,
    pub permission_denied: bool,
    pub error: Option<String>,
}

/// Per-record results plus batch counters.
///
/// `successful + failed == results.len()` and `verified <= successful`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionBatch {
    pub results: Vec<InjectionResult>,
    pub successful: usize,
    pub verified: usize,
    pub failed: usize,
    pub permission_denied: usize,
    /// Stopped before the last event
    #[serde(default)]
    pub interrupted: bool,
}

impl InjectionBatch {
    /// Rebuild counters from stored results
    pub fn from_results(results: Vec<InjectionResult>) -> Self {
        let mut batch = Self::default();
        for result in results {
            batch.push(result);
        }
        batch
    }

    fn push(&mut self, result: InjectionResult) {
        if result.success {
            self.successful += 1;
            if result.verified {
                self.verified += 1;
            }
        } else {
            self.failed += 1;
        }
        if result.permission_denied {
            self.permission_denied += 1;
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// `verified / successful`, undefined when nothing succeeded
    pub fn verification_rate(&self) -> Option<f64> {
        if self.successful == 0 {
            None
        } else {
            Some(self.verified as f64 / self.successful as f64)
        }
    }

    /// Accepted writes the read-back did not find
    pub fn unverified(&self) -> usize {
        self.successful - self.verified
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.results.iter().filter(|r| r.kind == kind).count()
    }
}

pub struct RecordInjector<'a> {
    link: &'a DeviceLink,
    directory: &'a CharacterDirectory,
    config: &'a InjectionConfig,
    catalog: Catalog,
    rng: StdRng,
    running: Option<Arc<AtomicBool>>,
}

impl<'a> RecordInjector<'a> {
    pub fn new(
        link: &'a DeviceLink,
        directory: &'a CharacterDirectory,
        config: &'a InjectionConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            link,
            directory,
            config,
            catalog: Catalog::from_config(config),
            rng,
            running: None,
        }
    }

    /// Stop before the next record once `running` is cleared
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    fn stopped(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::SeqCst))
    }

    pub fn inject(&mut self, events: &[TimelineEvent], bindings: &ProviderBindings) -> InjectionBatch {
        self.inject_with_progress(events, bindings, |_, _, _| {})
    }

    /// Inject in order, calling `progress(done, total, result)` after each record.
    pub fn inject_with_progress<F>(
        &mut self,
        events: &[TimelineEvent],
        bindings: &ProviderBindings,
        mut progress: F,
    ) -> InjectionBatch
    where
        F: FnMut(usize, usize, &InjectionResult),
    {
        let total = events.len();
        let mut batch = InjectionBatch::default();

        for (seq, event) in events.iter().enumerate() {
            if self.stopped() {
                tracing::warn!(done = seq, total, "injection interrupted");
                batch.interrupted = true;
                break;
            }
            let result = self.inject_one(seq, event, bindings);
            progress(seq + 1, total, &result);
            batch.push(result);
        }

        tracing::info!(
            total,
            successful = batch.successful,
            verified = batch.verified,
            failed = batch.failed,
            permission_denied = batch.permission_denied,
            interrupted = batch.interrupted,
            "injection batch finished"
        );
        batch
    }

    fn inject_one(&mut self, seq: usize, event: &TimelineEvent, bindings: &ProviderBindings) -> InjectionResult {
        let binding = match bindings.get(event.kind) {
            Ok(binding) => binding,
            Err(e) => {
                tracing::warn!(seq, kind = event.kind.as_str(), error = %e, "skipped");
                return InjectionResult {
                    seq,
                    kind: event.kind,
                    uri: None,
                    address: String::new(),
                    timestamp: event.timestamp,
                    success: false,
                    verified: false,
                    permission_denied: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let builder = RecordBuilder {
            directory: self.directory,
            config: self.config,
            catalog: &self.catalog,
        };
        let record = builder.build(seq, event, binding, &mut self.rng);

        let outcome = self.write(&record);
        let mut result = InjectionResult {
            seq,
            kind: record.kind,
            uri: Some(record.uri.clone()),
            address: record.address.clone(),
            timestamp: record.timestamp,
            success: false,
            verified: false,
            permission_denied: false,
            error: None,
        };

        match outcome {
            Ok(verified) => {
                result.success = true;
                result.verified = verified;
                if verified {
                    tracing::debug!(seq, kind = record.kind.as_str(), uri = %record.uri, address = %record.address, timestamp = record.timestamp, "injected and verified");
                } else {
                    result.error = Some("row not found on read-back".to_string());
                    tracing::warn!(seq, kind = record.kind.as_str(), uri = %record.uri, address = %record.address, timestamp = record.timestamp, "write accepted but not found on read-back");
                }
            }
            Err(e) => {
                let failure = Error::RecordInjectionFailed {
                    kind: record.kind,
                    detail: e.to_string(),
                };
                result.permission_denied = e.is_permission_denied();
                result.error = Some(failure.to_string());
                tracing::warn!(
                    seq,
                    kind = record.kind.as_str(),
                    uri = %record.uri,
                    address = %record.address,
                    timestamp = record.timestamp,
                    command = %insert_command(&record.uri, &record.bindings),
                    error = %e,
                    "injection failed"
                );
            }
        }

        self.pause(record.kind);
        result
    }

    /// Write a record and read it back. `Ok(false)` means the write was
    /// accepted but the row was not found.
    fn write(&self, record: &InjectionRecord) -> Result<bool> {
        self.link.content_insert(&record.uri, &record.bindings)?;

        let found = self.link.content_query(&record.read_back_query())?;
        let Some(plan) = &record.mms else {
            return Ok(!found.is_empty());
        };

        // MMS: the message row's id anchors the addr and part rows
        let Some(mms_id) = found.first().and_then(|row| row.get_i64("_id")) else {
            return Ok(false);
        };

        let addr_uri = format!("{}/{}/addr", record.uri, mms_id);
        for address in &plan.addresses {
            self.link
                .content_insert(&addr_uri, &address.bindings(mms_id))?;
        }

        let part_uri = format!("{}/{}/part", record.uri, mms_id);
        for part in &plan.parts {
            if let Some(local) = &part.local_path {
                self.link.push(local, &part.remote_path(record.seq))?;
            }
            self.link
                .content_insert(&part_uri, &part.bindings(mms_id, record.seq))?;
        }

        let parts = self
            .link
            .content_query(&ContentQuery::new(&part_uri).projection(&["_id"]))?;
        Ok(parts.len() >= plan.parts.len())
    }

    fn pause(&self, kind: RecordKind) {
        let millis = match kind {
            RecordKind::Sms => self.config.sms_delay_ms,
            RecordKind::Mms => self.config.mms_delay_ms,
            RecordKind::Call => self.config.call_delay_ms,
        };
        if millis > 0 {
            std::thread::sleep(Duration::from_millis(millis));
        }
    }
}
