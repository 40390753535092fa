//! Tracing pipeline initialisation.
//!
//! [`init_tracing`] installs one `tracing` subscriber made of an
//! [`EnvFilter`], a console layer on stderr and, when a collector is
//! configured, an OpenTelemetry layer.  Every exported span carries the
//! [`TelemetryContext`] of the run: which pipeline is active and which
//! topics or recording it is bound to.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). Enables span export. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `REFLECTOR_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! use reflector_runtime::telemetry::{TelemetryContext, init_tracing};
//!
//! let context = TelemetryContext::live("reflector", "/scan_filtered", "/pc_pub");
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = init_tracing(&context);
//! ```

use std::path::{Path, PathBuf};

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Selects newline-delimited JSON output when set to `json`.
pub const LOG_FORMAT_ENV: &str = "REFLECTOR_LOG_FORMAT";

/// Collector URL; span export is off when unset.
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Instrumentation scope of the exported spans.
const TRACER_SCOPE: &str = "reflector-runtime";

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// Where scans come from and clouds go to in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pipeline {
    /// Live rosbridge topics.
    Live {
        scan_topic: String,
        cloud_topic: String,
    },
    /// A JSON-lines scan recording.
    Replay { input: PathBuf },
}

impl Pipeline {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Live { .. } => "live",
            Self::Replay { .. } => "replay",
        }
    }
}

/// Identity of the running detector, exported as OTel resource attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryContext {
    pub service_name: String,
    pub pipeline: Pipeline,
}

impl TelemetryContext {
    pub fn live(service_name: &str, scan_topic: &str, cloud_topic: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            pipeline: Pipeline::Live {
                scan_topic: scan_topic.to_string(),
                cloud_topic: cloud_topic.to_string(),
            },
        }
    }

    pub fn replay(service_name: &str, input: &Path) -> Self {
        Self {
            service_name: service_name.to_string(),
            pipeline: Pipeline::Replay {
                input: input.to_path_buf(),
            },
        }
    }

    /// Resource attributes besides `service.name`.
    pub fn resource_attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("reflector.mode", self.pipeline.mode()),
        ];
        match &self.pipeline {
            Pipeline::Live {
                scan_topic,
                cloud_topic,
            } => {
                attributes.push(KeyValue::new("reflector.scan_topic", scan_topic.clone()));
                attributes.push(KeyValue::new("reflector.cloud_topic", cloud_topic.clone()));
            }
            Pipeline::Replay { input } => {
                attributes.push(KeyValue::new(
                    "reflector.replay_input",
                    input.display().to_string(),
                ));
            }
        }
        attributes
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Console format
// ─────────────────────────────────────────────────────────────────────────────

/// Console log format, chosen by [`LOG_FORMAT_ENV`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }

    /// Console layer on stderr; stdout may be carrying replayed clouds.
    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self {
            Self::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
            Self::Compact => tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .boxed(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber for `context`.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending spans.
pub fn init_tracing(context: &TelemetryContext) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .and_then(|endpoint| build_provider(&endpoint, context));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_SCOPE)));

    if let Err(e) = tracing_subscriber::registry()
        .with(LogFormat::from_env().layer())
        .with(otel_layer)
        .with(env_filter)
        .try_init()
    {
        eprintln!("[reflector] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[reflector] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// Build the OTLP/HTTP provider.  `None` when the exporter cannot be built;
/// console logging still works in that case.
fn build_provider(endpoint: &str, context: &TelemetryContext) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[reflector] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(context.service_name.clone())
        .with_attributes(context.resource_attributes())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The CLI builds its Tokio runtime after calling `init_tracing`,
            // so the exporter must not spawn tasks.
            .with_simple_exporter(exporter)
            .build(),
    )
}
