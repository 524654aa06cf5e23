//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use shipyard_types::config::TracingConfig;
//!
//! // Human-readable logs, `info` unless RUST_LOG says otherwise
//! shipyard_observe::tracing_setup::init_tracing(&TracingConfig::default()).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

use shipyard_types::config::TracingConfig;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Filter directives to install: `RUST_LOG` when set and non-empty,
/// otherwise the configured default.
pub fn filter_directives(env: Option<String>, configured: &str) -> String {
    env.filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

/// Build the `EnvFilter`. Invalid directives fall back to `info`.
pub fn build_filter(config: &TracingConfig) -> EnvFilter {
    let directives = filter_directives(std::env::var("RUST_LOG").ok(), &config.filter);
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Warning: invalid log filter '{directives}': {e}, using 'info'");
        EnvFilter::new("info")
    })
}

/// Initialize the global tracing subscriber.
///
/// - Installs either a human `fmt` layer (with span close timing) or a JSON
///   layer, depending on `config.json`.
/// - When `config.otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(config: &TracingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let output = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    };

    let otel = config.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("shipyard");

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(output)
        .with(otel)
        .try_init()?;

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
