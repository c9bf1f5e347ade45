use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ielts_exam_runtime::browser::{EventBus, HeadlessBrowser};
use ielts_exam_runtime::dom::Document;
use ielts_exam_runtime::metrics::render_metrics;
use ielts_exam_runtime::models::{SectionType, TimerEvent};
use ielts_exam_runtime::services::highlight::FileStore;
use ielts_exam_runtime::services::{
    AdvanceOutcome, ExamSession, HttpExamApi, SessionDeps, SessionPrompt,
};
use ielts_exam_runtime::Config;

/// Answers prompts from stdin. Advances are always confirmed.
struct TerminalPrompt;

#[async_trait]
impl SessionPrompt for TerminalPrompt {
    async fn confirm_advance(&self, _from: SectionType) -> bool {
        true
    }

    async fn retry_submission(&self, error: &str) -> bool {
        eprintln!("Submission failed: {}", error);
        eprintln!("Retry? [y/N]");
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let tracer = init_telemetry();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ielts_exam_runtime=debug,exam_runner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .init();

    let mut args = std::env::args().skip(1);
    let attempt_id = args
        .next()
        .context("usage: exam-runner <attempt_id> [section]")?;
    let first_section = match args.next() {
        Some(name) => SectionType::parse(&name)
            .with_context(|| format!("unknown section: {}", name))?,
        None => SectionType::Listening,
    };

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {:?}, api={}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
        config.api_base_url
    );

    let api = HttpExamApi::new(&config).context("Failed to build API client")?;
    let deps = SessionDeps {
        api: Arc::new(api),
        browser: Arc::new(HeadlessBrowser::new()),
        prompt: Arc::new(TerminalPrompt),
        store: Arc::new(FileStore::new(config.highlight_store_dir.clone())),
        document: Document::new().into_shared(),
        bus: EventBus::new(),
        settings: config.runtime.clone(),
    };

    let (session, mut timer_events) = ExamSession::new(attempt_id.clone(), deps);
    session.load_section(first_section).await?;
    session.begin().await?;
    tracing::info!("Attempt {} started at {}", attempt_id, first_section);

    loop {
        tokio::select! {
            event = timer_events.recv() => {
                let Some(event) = event else { break };
                tracing::trace!("{} {}", event.event_name(), event.to_json());
                if let TimerEvent::TimerTick(tick) = &event {
                    if tick.remaining_seconds % 60 == 0 {
                        tracing::info!("{} remaining: {}s", tick.section, tick.remaining_seconds);
                    }
                    continue;
                }
                match session.handle_timer_event(&event).await {
                    Ok(Some(AdvanceOutcome::Completed)) => {
                        tracing::info!("Attempt {} submitted", attempt_id);
                        break;
                    }
                    Ok(Some(AdvanceOutcome::SubmissionCancelled)) => {
                        tracing::warn!("Submission cancelled, exiting");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Section transition failed: {:#}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, saving pending answers");
                break;
            }
        }
    }

    session.teardown().await;
    match render_metrics() {
        Ok(metrics) => tracing::debug!("Session metrics:\n{}", metrics),
        Err(e) => tracing::warn!("Failed to render metrics: {}", e),
    }
    shutdown_telemetry();
    Ok(())
}

/// OTLP tracer when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_telemetry() -> Option<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Failed to create OTLP exporter: {}", e);
            return None;
        }
    };

    let resource = Resource::builder_empty()
        .with_service_name("ielts-exam-runner")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("exam-runner");
    opentelemetry::global::set_tracer_provider(provider);

    Some(tracer)
}

fn shutdown_telemetry() {
    tracing::info!("Shutting down OpenTelemetry");
}
