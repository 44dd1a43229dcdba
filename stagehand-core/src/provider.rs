//! ProviderLocator: which database and content URI back each record kind.
//!
//! Vendor builds move the SMS and call-log databases around. Known locations
//! are kept as an ordered catalogue of typed candidates; the first one whose
//! file exists on the device wins. When none exists, the stock URI is probed
//! with a one-row read and bound without a file path.

use crate::device::{ContentQuery, DeviceLink};
use crate::error::{Error, Result};
use crate::types::RecordKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// Which firmware family a binding targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Samsung,
    Stock,
}

/// One known database location for a record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCandidate {
    pub kind: RecordKind,
    pub vendor: Vendor,
    pub path: &'static str,
    pub uri: &'static str,
}

const SAMSUNG_MESSAGES: &str = "/data/data/com.samsung.android.messaging/databases/message.db";
const STOCK_MESSAGES: &str = "/data/data/com.android.providers.telephony/databases/mmssms.db";
const SAMSUNG_CALLLOG: &str = "/data/data/com.android.providers.contacts/databases/calllog.db";
const SAMSUNG_DIALER_CALLLOG: &str = "/data/data/com.samsung.android.dialer/databases/calllog.db";
const STOCK_CONTACTS: &str = "/data/data/com.android.providers.contacts/databases/contacts2.db";

/// Candidates in priority order. Vendor paths precede stock paths.
pub const CANDIDATES: &[ProviderCandidate] = &[
    ProviderCandidate {
        kind: RecordKind::Sms,
        vendor: Vendor::Samsung,
        path: SAMSUNG_MESSAGES,
        uri: "content://sms",
    },
    ProviderCandidate {
        kind: RecordKind::Sms,
        vendor: Vendor::Stock,
        path: STOCK_MESSAGES,
        uri: "content://sms",
    },
    ProviderCandidate {
        kind: RecordKind::Mms,
        vendor: Vendor::Samsung,
        path: SAMSUNG_MESSAGES,
        uri: "content://mms",
    },
    ProviderCandidate {
        kind: RecordKind::Mms,
        vendor: Vendor::Stock,
        path: STOCK_MESSAGES,
        uri: "content://mms",
    },
    // Samsung serves its call log under the `logs` authority
    ProviderCandidate {
        kind: RecordKind::Call,
        vendor: Vendor::Samsung,
        path: SAMSUNG_CALLLOG,
        uri: "content://logs/call",
    },
    ProviderCandidate {
        kind: RecordKind::Call,
        vendor: Vendor::Samsung,
        path: SAMSUNG_DIALER_CALLLOG,
        uri: "content://logs/call",
    },
    ProviderCandidate {
        kind: RecordKind::Call,
        vendor: Vendor::Stock,
        path: STOCK_CONTACTS,
        uri: "content://call_log/calls",
    },
];

/// Database files whose modes are repaired when nothing has been located
pub const DEFAULT_DATABASE_PATHS: &[&str] = &[STOCK_MESSAGES, SAMSUNG_CALLLOG];

/// Stock URI probed when no candidate file exists
pub fn stock_uri(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Sms => "content://sms",
        RecordKind::Mms => "content://mms",
        RecordKind::Call => "content://call_log/calls",
    }
}

/// Resolved (URI, optional file path) for one record kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderBinding {
    pub kind: RecordKind,
    pub vendor: Vendor,
    /// Content URI used for every write and read-back
    pub uri: String,
    /// Backing database file, when known
    pub path: Option<String>,
}

impl ProviderBinding {
    pub fn is_vendor_specific(&self) -> bool {
        self.vendor != Vendor::Stock
    }

    fn from_candidate(candidate: &ProviderCandidate) -> Self {
        Self {
            kind: candidate.kind,
            vendor: candidate.vendor,
            uri: candidate.uri.to_string(),
            path: Some(candidate.path.to_string()),
        }
    }

    fn stock(kind: RecordKind) -> Self {
        Self {
            kind,
            vendor: Vendor::Stock,
            uri: stock_uri(kind).to_string(),
            path: None,
        }
    }
}

/// At most one binding per record kind; absent kinds are unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProviderBindings {
    bindings: BTreeMap<RecordKind, ProviderBinding>,
}

impl ProviderBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a kind, replacing any previous binding for it
    pub fn insert(&mut self, binding: ProviderBinding) {
        self.bindings.insert(binding.kind, binding);
    }

    /// The binding for a kind, or `ProviderUnavailable`
    pub fn get(&self, kind: RecordKind) -> Result<&ProviderBinding> {
        self.bindings
            .get(&kind)
            .ok_or(Error::ProviderUnavailable(kind))
    }

    pub fn is_bound(&self, kind: RecordKind) -> bool {
        self.bindings.contains_key(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderBinding> {
        self.bindings.values()
    }

    pub fn unbound_kinds(&self) -> Vec<RecordKind> {
        RecordKind::ALL
            .into_iter()
            .filter(|k| !self.is_bound(*k))
            .collect()
    }

    /// Distinct database files behind the bound kinds
    pub fn database_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.iter().filter_map(|b| b.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Detects provider bindings on one device
pub struct ProviderLocator<'a> {
    link: &'a DeviceLink,
}

impl<'a> ProviderLocator<'a> {
    pub fn new(link: &'a DeviceLink) -> Self {
        Self { link }
    }

    /// Bind every record kind that has a usable provider.
    ///
    /// Only transport failures abort; a kind that cannot be bound is left out.
    pub fn locate(&self) -> Result<ProviderBindings> {
        let mut bindings = ProviderBindings::new();
        for kind in RecordKind::ALL {
            match self.locate_kind(kind)? {
                Some(binding) => {
                    tracing::info!(
                        kind = kind.as_str(),
                        uri = %binding.uri,
                        path = binding.path.as_deref().unwrap_or("-"),
                        vendor = ?binding.vendor,
                        "provider located"
                    );
                    bindings.insert(binding);
                }
                None => tracing::warn!(kind = kind.as_str(), "no provider available"),
            }
        }
        Ok(bindings)
    }

    pub fn locate_kind(&self, kind: RecordKind) -> Result<Option<ProviderBinding>> {
        for candidate in CANDIDATES.iter().filter(|c| c.kind == kind) {
            match self.link.file_exists(candidate.path) {
                Ok(true) => return Ok(Some(ProviderBinding::from_candidate(candidate))),
                Ok(false) => {}
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    tracing::debug!(path = candidate.path, error = %e, "candidate probe failed")
                }
            }
        }

        let probe = ContentQuery::new(stock_uri(kind))
            .projection(&["_id"])
            .limit(1);
        match self.link.content_query(&probe) {
            Ok(_) => Ok(Some(ProviderBinding::stock(kind))),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                tracing::debug!(uri = stock_uri(kind), error = %e, "stock URI probe failed");
                Ok(None)
            }
        }
    }
}
