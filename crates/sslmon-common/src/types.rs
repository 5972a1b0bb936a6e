use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u32 = 1440;
pub const MIN_CHECK_INTERVAL_MINUTES: u32 = 1;
/// One week.
pub const MAX_CHECK_INTERVAL_MINUTES: u32 = 10_080;

/// A monitored endpoint as held by the domain registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Registry key
    pub id: String,
    /// Host name or IP literal
    pub name: String,
    pub port: u16,
    pub active: bool,
    pub check_interval_minutes: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    /// `None` means never checked, eligible immediately
    pub next_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Domain {
    /// `host:port`, as used for the TCP connect.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    /// Active and either never checked or past its next check time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_check_at.map_or(true, |next| next <= now)
    }

    pub fn schedule(&self) -> ScheduleState {
        ScheduleState {
            last_check_at: self.last_check_at,
            next_check_at: self.next_check_at,
        }
    }
}

/// Input for registering a domain with a registry. Unset fields take the
/// registry defaults (port 443, active, 1440 minute interval).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDomainRequest {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub check_interval_minutes: Option<u32>,
}

impl CreateDomainRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.check_interval_minutes = Some(minutes);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = Some(false);
        self
    }
}

/// Scheduling timestamps of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub last_check_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
}

impl ScheduleState {
    /// State after a check completed at `checked_at`.
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use sslmon_common::types::ScheduleState;
    ///
    /// let now = Utc::now();
    /// let state = ScheduleState::after_check(now, 1440);
    /// assert_eq!(state.last_check_at, Some(now));
    /// assert_eq!(state.next_check_at, Some(now + Duration::minutes(1440)));
    /// ```
    pub fn after_check(checked_at: DateTime<Utc>, interval_minutes: u32) -> Self {
        Self {
            last_check_at: Some(checked_at),
            next_check_at: Some(checked_at + Duration::minutes(i64::from(interval_minutes))),
        }
    }
}

/// Command issued by the scheduler after a sweep: "this domain was checked at
/// `checked_at`, schedule the next check `interval_minutes` later".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceSchedule {
    pub domain_id: String,
    pub checked_at: DateTime<Utc>,
    pub interval_minutes: u32,
}

impl AdvanceSchedule {
    pub fn for_domain(domain: &Domain, checked_at: DateTime<Utc>) -> Self {
        Self {
            domain_id: domain.id.clone(),
            checked_at,
            interval_minutes: domain.check_interval_minutes,
        }
    }

    pub fn resulting_state(&self) -> ScheduleState {
        ScheduleState::after_check(self.checked_at, self.interval_minutes)
    }
}

/// Active/inactive domain counts reported by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCounts {
    pub active: u64,
    pub inactive: u64,
}

/// Lifecycle status of an inspected certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Valid,
    ExpiringSoon,
    Expired,
    Error,
    Untrusted,
}

impl CertificateStatus {
    pub const ALL: [CertificateStatus; 5] = [
        CertificateStatus::Valid,
        CertificateStatus::ExpiringSoon,
        CertificateStatus::Expired,
        CertificateStatus::Error,
        CertificateStatus::Untrusted,
    ];

    /// Expiry-based classification. Never yields `Error` or `Untrusted`.
    ///
    /// ```
    /// use sslmon_common::types::CertificateStatus;
    ///
    /// assert_eq!(CertificateStatus::classify(-1, 7), CertificateStatus::Expired);
    /// assert_eq!(CertificateStatus::classify(0, 7), CertificateStatus::ExpiringSoon);
    /// assert_eq!(CertificateStatus::classify(7, 7), CertificateStatus::ExpiringSoon);
    /// assert_eq!(CertificateStatus::classify(8, 7), CertificateStatus::Valid);
    /// ```
    pub fn classify(days_until_expiry: i64, critical_threshold_days: i64) -> Self {
        if days_until_expiry < 0 {
            Self::Expired
        } else if days_until_expiry <= critical_threshold_days {
            Self::ExpiringSoon
        } else {
            Self::Valid
        }
    }

    /// Statuses that carry an `error_message`.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::Untrusted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::ExpiringSoon => "EXPIRING_SOON",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
            Self::Untrusted => "UNTRUSTED",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckErrorKind {
    /// DNS resolution, TCP connect failure or connect timeout
    Connection,
    /// TLS negotiation failure or handshake timeout
    Handshake,
    /// Per-task or batch deadline elapsed before a record was produced
    Timeout,
    /// Presented chain failed the trust observation
    Untrusted,
    Unexpected,
}

/// Day thresholds used to classify and report on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryThresholds {
    #[serde(default = "default_critical_days")]
    pub critical_days: i64,
    #[serde(default = "default_warning_days")]
    pub warning_days: i64,
    #[serde(default = "default_info_days")]
    pub info_days: i64,
}

impl Default for ExpiryThresholds {
    fn default() -> Self {
        Self {
            critical_days: default_critical_days(),
            warning_days: default_warning_days(),
            info_days: default_info_days(),
        }
    }
}

fn default_critical_days() -> i64 {
    7
}

fn default_warning_days() -> i64 {
    30
}

fn default_info_days() -> i64 {
    90
}

impl ExpiryThresholds {
    pub fn status_for(&self, days_until_expiry: i64) -> CertificateStatus {
        CertificateStatus::classify(days_until_expiry, self.critical_days)
    }

    pub fn tier_for(&self, days_until_expiry: i64) -> ExpiryTier {
        if days_until_expiry <= self.critical_days {
            ExpiryTier::Critical
        } else if days_until_expiry <= self.warning_days {
            ExpiryTier::Warning
        } else if days_until_expiry <= self.info_days {
            ExpiryTier::Info
        } else {
            ExpiryTier::Healthy
        }
    }
}

/// Reporting bucket derived from all three thresholds. Does not affect
/// [`CertificateStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpiryTier {
    Critical,
    Warning,
    Info,
    Healthy,
}

/// Outcome of one certificate check. Append-only history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: String,
    pub domain_id: String,
    pub domain: String,
    pub port: u16,
    pub subject: Option<String>,
    pub issuer: Option<String>,
    /// Decimal
    pub serial_number: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub days_until_expiry: Option<i64>,
    pub status: CertificateStatus,
    pub error_kind: Option<CheckErrorKind>,
    pub error_message: Option<String>,
    pub check_date: DateTime<Utc>,
    pub response_time_ms: u64,
    /// Lowercase hex SHA-256 over the leaf DER
    pub fingerprint_sha256: Option<String>,
    pub signature_algorithm: Option<String>,
    pub key_size: Option<u32>,
    /// Comma-joined DNS names, empty when the certificate carries none
    pub subject_alternative_names: Option<String>,
}

impl CertificateRecord {
    /// Record for a check that produced no certificate. All certificate
    /// fields are left empty.
    pub fn failure(
        domain: &Domain,
        kind: CheckErrorKind,
        message: impl Into<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: crate::id::next_id(),
            domain_id: domain.id.clone(),
            domain: domain.name.clone(),
            port: domain.port,
            subject: None,
            issuer: None,
            serial_number: None,
            valid_from: None,
            expiry_date: None,
            days_until_expiry: None,
            status: CertificateStatus::Error,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            check_date: Utc::now(),
            response_time_ms,
            fingerprint_sha256: None,
            signature_algorithm: None,
            key_size: None,
            subject_alternative_names: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn has_certificate(&self) -> bool {
        self.fingerprint_sha256.is_some()
    }
}
