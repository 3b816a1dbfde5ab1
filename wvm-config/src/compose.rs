// Standard library imports
use std::path::PathBuf;

// External crate imports
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// The compose document version this build understands.
pub const SUPPORTED_COMPOSE_VERSION: &str = "1";

// Accepts `version: 1` and `version: "1"` interchangeably.
fn deserialize_option_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{Error, Visitor};
    use std::fmt;

    struct StringOrNumberVisitor;

    impl<'de> Visitor<'de> for StringOrNumberVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string, number, or null")
        }

        fn visit_none<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(None)
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_f64<E>(self, value: f64) -> std::result::Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Some(value.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrNumberVisitor)
}

/// Root of a multi-VM compose document.
///
/// Maps VM names to their declarations. Declaration order is preserved and
/// is semantic: VMs with no dependencies start in the order they appear.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(
        default,
        deserialize_with = "deserialize_option_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,

    #[serde(default)]
    pub vms: IndexMap<String, ComposeVm>,

    /// Named volumes, passed through to the lifecycle backend untouched.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub volumes: IndexMap<String, VolumeSpec>,

    /// Named networks, passed through to the lifecycle backend untouched.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub networks: IndexMap<String, NetworkSpec>,

    /// Defaults applied to every VM that does not override them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<VmDefaults>,
}

/// One named VM in the topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeVm {
    /// Path to the per-VM configuration consumed by the lifecycle backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,

    /// Names of VMs that must be running before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,

    /// Convergence expectations checked by the validation pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectations: Option<ValidationExpectations>,
}

fn default_health_retries() -> u32 {
    3
}

fn default_health_interval() -> u64 {
    5
}

/// Post-start health probing parameters for one VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckSpec {
    #[serde(default = "default_health_retries")]
    pub retries: u32,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            retries: default_health_retries(),
            interval_secs: default_health_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
}

fn default_disk_limit_pct() -> u8 {
    90
}

/// What a converged guest is expected to look like.
///
/// Each list feeds one validation phase; an empty list means that phase has
/// nothing to check and contributes zero to the tallies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationExpectations {
    /// Bind-mounted or copied data paths that must exist and be non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_paths: Vec<PathBuf>,

    /// Debian packages expected to be installed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,

    /// Snap packages expected to be installed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snaps: Vec<String>,

    /// Systemd units expected enabled and active.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,

    /// Detected applications expected to respond to a liveness query.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,

    /// Launchability smoke tests, run in addition to presence checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smoke_tests: Vec<SmokeTest>,

    /// Root filesystem usage above this percentage counts as one failure.
    #[serde(default = "default_disk_limit_pct")]
    pub disk_limit_pct: u8,
}

impl Default for ValidationExpectations {
    fn default() -> Self {
        Self {
            data_paths: Vec::new(),
            packages: Vec::new(),
            snaps: Vec::new(),
            services: Vec::new(),
            applications: Vec::new(),
            smoke_tests: Vec::new(),
            disk_limit_pct: default_disk_limit_pct(),
        }
    }
}

/// One launchability probe: a command that must exit cleanly inside the
/// guest when the named application is usable, not merely installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeTest {
    pub name: String,
    pub command: String,
}
