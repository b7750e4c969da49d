use anyhow::{Context, Result};
use clap::Parser;
use loqa_converse::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource, MicrophoneBackend};
use loqa_converse::controller::{Collaborators, Controller, ControllerHandle, ControllerNotice};
use loqa_converse::http::{create_router, AppState, DeviceLister};
use loqa_converse::nats::NatsClient;
use loqa_converse::playback::RodioPlayback;
use loqa_converse::preferences::JsonFilePreferences;
use loqa_converse::recognition::NatsEngineFactory;
use loqa_converse::responder::HttpResponder;
use loqa_converse::Config;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Hands-free voice conversation controller
#[derive(Debug, Parser)]
#[command(name = "loqa-converse", version, about)]
struct Cli {
    /// Config file path (without extension)
    #[arg(long, default_value = "config/loqa-converse")]
    config: String,

    /// Input device name to use for this run (the saved choice is kept)
    #[arg(long)]
    device: Option<String>,

    /// Replay a WAV file instead of capturing from the microphone
    #[arg(long)]
    input: Option<String>,

    /// Print available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Skip the control API and start listening right away
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for name in MicrophoneBackend::list_input_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut cfg = Config::load(&cli.config)?;
    if let Some(input) = &cli.input {
        cfg.audio.input_file = Some(input.clone());
    }

    info!("Loqa Converse v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let source = match &cfg.audio.input_file {
        Some(path) => AudioSource::File(path.clone()),
        None => AudioSource::Microphone,
    };
    info!("Audio source: {:?}", source);

    let backends = Arc::new(AudioBackendFactory::new(
        source,
        AudioBackendConfig {
            target_sample_rate: cfg.audio.sample_rate,
            target_channels: cfg.audio.channels,
            buffer_duration_ms: cfg.audio.buffer_duration_ms,
            device_id: cfg.audio.device_id.clone(),
        },
    ));

    let nats = NatsClient::connect(&cfg.recognition.nats_url).await?;
    let engines = Arc::new(NatsEngineFactory::new(
        nats,
        cfg.recognition.language.clone(),
        cfg.audio.sample_rate,
    ));

    let responder = Arc::new(HttpResponder::new(&cfg.responder).context("Failed to build responder")?);

    let (mut controller, handle) = Controller::new(
        &cfg,
        Collaborators {
            backends,
            engines,
            responder,
            playback: Box::new(RodioPlayback::new()),
            preferences: Box::new(JsonFilePreferences::open(&cfg.preferences.path)),
        },
    );
    if let Some(device) = cli.device {
        controller.use_device(device);
    }
    let controller_task = tokio::spawn(controller.run());

    tokio::spawn(log_notices(handle.clone()));

    if cli.no_http {
        handle.start_continuous_listening();
        info!("Listening; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    } else {
        let devices: DeviceLister = Arc::new(|| {
            MicrophoneBackend::list_input_devices().unwrap_or_else(|e| {
                warn!("Failed to list input devices: {}", e);
                Vec::new()
            })
        });
        let app = create_router(AppState::new(handle.clone(), devices));

        let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("HTTP control API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("HTTP server failed")?;
    }

    info!("Shutting down");
    handle.shutdown();
    controller_task.await.context("Controller task panicked")?;

    Ok(())
}

async fn log_notices(handle: ControllerHandle) {
    let mut notices = handle.subscribe();
    loop {
        match notices.recv().await {
            Ok(ControllerNotice::UserMessage(text)) => info!("You: {}", text),
            Ok(ControllerNotice::AssistantMessage(text)) => info!("Assistant: {}", text),
            Ok(ControllerNotice::Error(message)) => warn!("{}", message),
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
