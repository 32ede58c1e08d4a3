use std::{env, time::Duration};

const DEFAULT_SLOW_OPERATION: Duration = Duration::from_millis(1000);

#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Clone)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    /// Warnings captured during config parsing so they can be logged after tracing is initialized.
    pub(crate) warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        let component = component.trim().to_string();

        let service_name = env_string("SERVICE_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| component.clone());

        let environment = env_string("STAGE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let mut warnings = Vec::new();
        if let Some(raw) = env_string("LEDGER_SLOW_OPERATION_MS") {
            if parse_millis(&raw).is_none() {
                warnings.push(format!(
                    "LEDGER_SLOW_OPERATION_MS is invalid (value: {raw}); defaulting to {}ms",
                    DEFAULT_SLOW_OPERATION.as_millis()
                ));
            }
        }

        Self {
            service_context: ServiceContext {
                service_name,
                environment,
                component,
            },
            warnings,
        }
    }
}

/// Threshold above which ledger operations are logged at WARN.
pub fn slow_operation_threshold() -> Duration {
    env_string("LEDGER_SLOW_OPERATION_MS")
        .and_then(|raw| parse_millis(&raw))
        .unwrap_or(DEFAULT_SLOW_OPERATION)
}

fn parse_millis(input: &str) -> Option<Duration> {
    input.trim().parse::<u64>().ok().map(Duration::from_millis)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}
