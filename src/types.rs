use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-assigned identifier of one scan session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// AWS secret access key. Never printed: `Debug` and `Display` redact it and
/// the value is only reachable through [`SecretKey::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl Serialize for SecretKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretKey)
    }
}

/// Regions a scan covers: every enabled region, or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegionScope {
    #[default]
    All,
    Regions(Vec<String>),
}

impl RegionScope {
    /// Empty region lists collapse to `All`, which is what the service does with them.
    pub fn from_regions(regions: Vec<String>) -> Self {
        let regions: Vec<String> = regions
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if regions.is_empty() || regions.iter().any(|r| r.eq_ignore_ascii_case("all")) {
            RegionScope::All
        } else {
            RegionScope::Regions(regions)
        }
    }
}

impl Serialize for RegionScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RegionScope::All => serializer.serialize_str("all"),
            RegionScope::Regions(list) => list.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RegionScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => RegionScope::from_regions(vec![s]),
            Raw::Many(list) => RegionScope::from_regions(list),
        })
    }
}

/// Body of `POST /api/scans/start`. Consumed by value on submit and dropped
/// once the start call resolves.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub access_key_id: String,
    pub secret_access_key: SecretKey,
    #[serde(default)]
    pub region_scope: RegionScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl fmt::Debug for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRequest")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &self.secret_access_key)
            .field("region_scope", &self.region_scope)
            .field("role_arn", &self.role_arn)
            .field("external_id", &self.external_id.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Finding severity. Ordering follows risk: `Low < Medium < High < Critical`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Highest risk first.
    pub const RANKED: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected condition reported by the scanning service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub rule_id: String,
    pub service: String,
    pub severity: Severity,
    pub status: String,
    #[serde(default)]
    pub evidence: Map<String, Value>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Lifecycle status reported by the service for a scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
    Other(String),
}

impl ScanStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => ScanStatus::Pending,
            "RUNNING" => ScanStatus::Running,
            "COMPLETED" => ScanStatus::Completed,
            "FAILED" => ScanStatus::Failed,
            "PARTIAL" => ScanStatus::Partial,
            _ => ScanStatus::Other(raw.to_string()),
        }
    }

    /// No further findings will arrive once a scan reaches one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// Per-severity and per-service totals for one scan, in server order.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub severity_totals: Vec<(Severity, u64)>,
    pub service_totals: Vec<(String, u64)>,
    pub total_findings: u64,
    pub status: String,
}

impl Summary {
    pub fn severity_count(&self, severity: Severity) -> u64 {
        self.severity_totals
            .iter()
            .find(|(s, _)| *s == severity)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn scan_status(&self) -> ScanStatus {
        ScanStatus::parse(&self.status)
    }
}

/// One cell of the severity heatmap.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeatmapEntry {
    pub severity: Severity,
    pub count: u64,
}

/// Progress of one region shard, from `GET /api/scans/{id}/status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegionProgress {
    pub region: String,
    pub status: String,
    #[serde(default)]
    pub service_progress: std::collections::BTreeMap<String, String>,
}

/// Response of `GET /api/scans/{id}/status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
    pub scan_id: String,
    pub status: String,
    #[serde(default)]
    pub regions: Vec<RegionProgress>,
}
