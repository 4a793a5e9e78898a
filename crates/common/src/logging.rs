//! Tracing initialization for the gateway processes.
//!
//! Events always go to stdout. When an OTLP collector is configured, spans are exported to it
//! as well, tagged with the process' whoami string as `service.name`.
use std::{env, error::Error};

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{info, warn, Subscriber};
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Collector URL spans are exported to. Nothing is exported when unset.
pub const OTLP_URL_ENVVAR: &str = "GATEWAY_OTLP_URL";

/// Label distinguishing several instances of the same process, appended to the whoami string.
pub const SVC_LABEL_ENVVAR: &str = "GATEWAY_SVC_LABEL";

/// Set to `1` to print the source file of every event.
pub const LOG_FILE_ENVVAR: &str = "LOG_FILE";

/// Set to `1` to print the source line of every event.
pub const LOG_LINE_NUM_ENVVAR: &str = "LOG_LINE_NUM";

const TRACER_NAME: &str = "tx-gateway";

/// How a process identifies itself in logs and where it exports spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    whoami: String,
    otlp_url: Option<String>,
}

impl LoggerConfig {
    /// Creates a config with the given whoami string and no span export.
    pub const fn new(whoami: String) -> Self {
        Self {
            whoami,
            otlp_url: None,
        }
    }

    /// Creates a config for the process called `base`.
    ///
    /// The service label and the collector URL are read from [`SVC_LABEL_ENVVAR`] and
    /// [`OTLP_URL_ENVVAR`].
    pub fn with_base_name(base: &str) -> Self {
        Self {
            whoami: whoami_string(base, env::var(SVC_LABEL_ENVVAR).ok().as_deref()),
            otlp_url: env::var(OTLP_URL_ENVVAR).ok().filter(|url| !url.is_empty()),
        }
    }

    /// Exports spans to `url`.
    pub fn set_otlp_url(&mut self, url: String) {
        self.otlp_url = Some(url);
    }

    /// The string the process identifies itself with.
    pub fn whoami(&self) -> &str {
        &self.whoami
    }

    /// The collector spans are exported to, if any.
    pub fn otlp_url(&self) -> Option<&str> {
        self.otlp_url.as_deref()
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("(tx-gateway)")
    }
}

/// Installs the global subscriber.
///
/// Must be called once per process. A collector that cannot be reached at startup does not stop
/// the process: stdout logging is installed alone and the failure is logged.
pub fn init(config: LoggerConfig) {
    let stdout = stdout_layer(
        env_flag(LOG_FILE_ENVVAR),
        env_flag(LOG_LINE_NUM_ENVVAR),
        EnvFilter::from_default_env(),
    );

    let Some(url) = config.otlp_url() else {
        tracing_subscriber::registry().with(stdout).init();
        info!(whoami = %config.whoami, "logging started");
        return;
    };

    match tracer_provider(url, &config.whoami) {
        Ok(provider) => {
            let otel = tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME));
            tracing_subscriber::registry()
                .with(stdout)
                .with(otel)
                .init();
            info!(whoami = %config.whoami, %url, "logging started with span export");
        }
        Err(err) => {
            tracing_subscriber::registry().with(stdout).init();
            warn!(whoami = %config.whoami, %url, %err, "logging started without span export");
        }
    }
}

fn stdout_layer<S>(with_file: bool, with_line_number: bool, filter: EnvFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .compact()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_file(with_file)
                .with_line_number(with_line_number),
        )
        .with_filter(filter)
}

fn tracer_provider(
    url: &str,
    whoami: &str,
) -> Result<SdkTracerProvider, Box<dyn Error + Send + Sync>> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(url)
        .build()?;

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", whoami.to_owned()))
        .build();

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| v == "1")
}

fn whoami_string(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if !label.is_empty() => format!("{base}%{label}"),
        _ => base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whoami_carries_the_service_label() {
        assert_eq!(whoami_string("gateway-node", None), "gateway-node");
        assert_eq!(whoami_string("gateway-node", Some("")), "gateway-node");
        assert_eq!(
            whoami_string("gateway-node", Some("eu-1")),
            "gateway-node%eu-1"
        );
    }

    #[test]
    fn span_export_is_opt_in() {
        let mut config = LoggerConfig::new("gateway-node".to_string());
        assert_eq!(config.otlp_url(), None);

        config.set_otlp_url("http://localhost:4317".to_string());
        assert_eq!(config.otlp_url(), Some("http://localhost:4317"));
        assert_eq!(config.whoami(), "gateway-node");
    }
}
