//! Operator configuration
//!
//! Settings are read from environment variables sharing a prefix
//! (`ENV_VAR_PREFIX`, default `GCP_HF_`). Parsing goes through a lookup
//! function so tests never touch the process environment.

use crate::error::ControllerError;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_PREFIX: &str = "GCP_HF_";

/// Runtime configuration of the operator.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespaces watched; the first is the primary namespace
    pub namespaces: Vec<String>,
    /// Value of the `managed-by` label on operator-owned pods
    pub operator_name: String,
    pub log_level: String,

    /// Maximum events consumed by the status worker per cycle
    pub status_batch_size: usize,
    /// Attempts per cluster call and per status-patch conflict cycle
    pub retry_count: u32,
    /// Initial backoff between attempts
    pub retry_interval: Duration,
    /// Longest wait for the first event of a status batch
    pub queue_poll_timeout: Duration,

    pub pod_create_batch_size: usize,
    /// Grace period for pods whose group does not set one
    pub default_pod_grace_period: i64,
    pub min_machine_count: i32,
    /// Upper bound on machines per group; 0 means unbounded
    pub max_machine_count: i32,

    pub min_request_id_length: usize,
    pub request_id_internal_prefix: String,
    pub preempted_request_id_prefix: String,
    /// Return request id recorded for pods deleted outside a return request
    pub system_initiated_return_msg: String,

    /// How long terminal resources are kept before cleanup
    pub completed_retain_time: Duration,
    /// Interval between cleanup sweeps
    pub completed_check_interval: Duration,

    /// Cluster API request timeout
    pub client_timeout: Option<Duration>,
    pub enable_preemption_handling: bool,

    pub health_check_enabled: bool,
    pub health_check_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespaces: vec!["gcp-symphony".to_string()],
            operator_name: "gcp-symphony-operator".to_string(),
            log_level: "info".to_string(),
            status_batch_size: 50,
            retry_count: 3,
            retry_interval: Duration::from_millis(500),
            queue_poll_timeout: Duration::from_secs(2),
            pod_create_batch_size: 10,
            default_pod_grace_period: 30,
            min_machine_count: 1,
            max_machine_count: 1000,
            min_request_id_length: 8,
            request_id_internal_prefix: "int-".to_string(),
            preempted_request_id_prefix: "prmt-".to_string(),
            system_initiated_return_msg: "system-initiated-return".to_string(),
            completed_retain_time: Duration::from_secs(1440 * 60),
            completed_check_interval: Duration::from_secs(30 * 60),
            client_timeout: None,
            enable_preemption_handling: true,
            health_check_enabled: true,
            health_check_port: 8080,
        }
    }
}

impl OperatorConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = lookup("ENV_VAR_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let get = |key: &str| {
            lookup(&format!("{prefix}{key}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let namespaces = get("DEFAULT_NAMESPACES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.namespaces);

        let retain_minutes = match get("CRD_COMPLETED_RETAIN_TIME") {
            None => 1440,
            Some(raw) => parse_minutes(&raw).unwrap_or_else(|| {
                warn!("Invalid CRD_COMPLETED_RETAIN_TIME '{}', using 1440 minutes", raw);
                1440
            }),
        };
        let mut check_minutes: u64 = parse_or(get("CRD_COMPLETED_CHECK_INTERVAL"), "CRD_COMPLETED_CHECK_INTERVAL", 30)?;
        if check_minutes == 0 || check_minutes >= retain_minutes {
            let corrected = (retain_minutes / 2).max(1);
            warn!(
                "CRD_COMPLETED_CHECK_INTERVAL ({}m) must be below the retain time ({}m), using {}m",
                check_minutes, retain_minutes, corrected
            );
            check_minutes = corrected;
        }

        let retry_interval_secs: f64 = parse_or(get("CRD_UPDATE_RETRY_INTERVAL"), "CRD_UPDATE_RETRY_INTERVAL", 0.5)?;
        let poll_timeout_secs: f64 = parse_or(get("QUEUE_POLL_TIMEOUT"), "QUEUE_POLL_TIMEOUT", 2.0)?;
        let timeout_enabled = parse_bool(get("KUBERNETES_CLIENT_TIMEOUT_ENABLE"), false);
        let timeout_secs: u64 = parse_or(get("KUBERNETES_CLIENT_TIMEOUT"), "KUBERNETES_CLIENT_TIMEOUT", 10)?;

        let config = Self {
            namespaces,
            operator_name: get("OPERATOR_NAME").unwrap_or(defaults.operator_name),
            log_level: get("LOG_LEVEL").map_or(defaults.log_level, |v| v.to_lowercase()),
            status_batch_size: parse_or(get("CRD_UPDATE_BATCH_SIZE"), "CRD_UPDATE_BATCH_SIZE", defaults.status_batch_size)?,
            retry_count: parse_or(get("CRD_UPDATE_RETRY_COUNT"), "CRD_UPDATE_RETRY_COUNT", defaults.retry_count)?,
            retry_interval: duration_from_secs(retry_interval_secs, "CRD_UPDATE_RETRY_INTERVAL")?,
            queue_poll_timeout: duration_from_secs(poll_timeout_secs, "QUEUE_POLL_TIMEOUT")?,
            pod_create_batch_size: parse_or(get("POD_CREATE_BATCH_SIZE"), "POD_CREATE_BATCH_SIZE", defaults.pod_create_batch_size)?,
            default_pod_grace_period: parse_or(get("POD_GRACE_PERIOD"), "POD_GRACE_PERIOD", defaults.default_pod_grace_period)?,
            min_machine_count: parse_or(get("MINIMUM_MACHINE_COUNT"), "MINIMUM_MACHINE_COUNT", defaults.min_machine_count)?,
            max_machine_count: parse_or(get("MAXIMUM_MACHINE_COUNT"), "MAXIMUM_MACHINE_COUNT", defaults.max_machine_count)?,
            min_request_id_length: parse_or(get("MIN_REQUEST_ID_LENGTH"), "MIN_REQUEST_ID_LENGTH", defaults.min_request_id_length)?,
            request_id_internal_prefix: get("REQUEST_ID_INTERNAL_PREFIX").unwrap_or(defaults.request_id_internal_prefix),
            preempted_request_id_prefix: get("PREEMPTED_MACHINE_REQUEST_ID_PREFIX").unwrap_or(defaults.preempted_request_id_prefix),
            system_initiated_return_msg: get("SYSTEM_INITIATED_RETURN_MSG").unwrap_or(defaults.system_initiated_return_msg),
            completed_retain_time: Duration::from_secs(retain_minutes * 60),
            completed_check_interval: Duration::from_secs(check_minutes * 60),
            client_timeout: timeout_enabled.then(|| Duration::from_secs(timeout_secs)),
            enable_preemption_handling: parse_bool(get("ENABLE_GKE_PREEMPTION_HANDLING"), defaults.enable_preemption_handling),
            health_check_enabled: parse_bool(get("HEALTH_CHECK_ENABLED"), defaults.health_check_enabled),
            health_check_port: parse_or(get("HEALTH_CHECK_PORT"), "HEALTH_CHECK_PORT", defaults.health_check_port)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.status_batch_size == 0 {
            return Err(ControllerError::InvalidConfig("CRD_UPDATE_BATCH_SIZE must be at least 1".to_string()));
        }
        if self.pod_create_batch_size == 0 {
            return Err(ControllerError::InvalidConfig("POD_CREATE_BATCH_SIZE must be at least 1".to_string()));
        }
        if self.max_machine_count > 0 && self.min_machine_count > self.max_machine_count {
            return Err(ControllerError::InvalidConfig(format!(
                "MINIMUM_MACHINE_COUNT ({}) exceeds MAXIMUM_MACHINE_COUNT ({})",
                self.min_machine_count, self.max_machine_count
            )));
        }
        if self.operator_name.is_empty() {
            return Err(ControllerError::InvalidConfig("OPERATOR_NAME must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ControllerError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{key} has invalid value '{value}'"))),
    }
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    raw.map_or(default, |v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
}

fn duration_from_secs(secs: f64, key: &str) -> Result<Duration, ControllerError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ControllerError::InvalidConfig(format!("{key} must be a non-negative number of seconds")))
}

/// Parses a duration in minutes; `h`, `m` and `s` suffixes are honoured and
/// seconds round up to whole minutes.
fn parse_minutes(raw: &str) -> Option<u64> {
    let raw = raw.trim().to_lowercase();
    let (number, unit) = match raw.chars().last()? {
        'h' | 'm' | 's' => raw.split_at(raw.len() - 1),
        _ => (raw.as_str(), "m"),
    };
    let value: u64 = number.trim().parse().ok()?;
    let minutes = match unit {
        "h" => value * 60,
        "s" => value.div_ceil(60),
        _ => value,
    };
    (minutes > 0).then_some(minutes)
}
