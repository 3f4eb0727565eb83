//! Headless pipeline runner
//!
//! Reads raw s16le PCM frames from stdin, streams them through the
//! pipeline, and prints every pipeline event as one JSON line on stdout.
//! Exits 0 on graceful stop and non-zero on initialization failure.

use anyhow::Context;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use univoice::adapters::asr::DeepgramAdapter;
use univoice::adapters::llm::OpenAiService;
use univoice::adapters::store::JsonlSessionStore;
use univoice::config::AppConfig;
use univoice::domain::events::IpcCommand;
use univoice::domain::models::generate_id;
use univoice::pipeline::{spawn_pipeline, PipelineDeps};

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        log::error!("{:#}", e);
        eprintln!("univoice: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    let source_language =
        std::env::var("UNIVOICE_SOURCE_LANGUAGE").unwrap_or_else(|_| "en".to_string());
    let target_language =
        std::env::var("UNIVOICE_TARGET_LANGUAGE").unwrap_or_else(|_| "ja".to_string());
    let sessions_dir =
        std::env::var("UNIVOICE_SESSIONS_DIR").unwrap_or_else(|_| "sessions".to_string());

    let deps = PipelineDeps {
        asr: Arc::new(DeepgramAdapter::new(
            config.recognizer.clone(),
            config.audio.clone(),
        )),
        llm: Arc::new(OpenAiService::new(config.llm.api_key.clone())),
        store: Some(Arc::new(JsonlSessionStore::new(sessions_dir))),
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let frame_size = config.audio.frame_size;
    let controller = spawn_pipeline(config, deps, events_tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::warn!("Failed to encode event: {}", e),
            }
        }
    });

    let correlation_id = generate_id("session");
    controller
        .execute(IpcCommand::StartListening {
            source_language,
            target_language,
            correlation_id: correlation_id.clone(),
        })
        .await
        .context("starting pipeline")?;

    let mut stdin = tokio::io::stdin();
    let mut buffer = vec![0u8; frame_size];
    loop {
        tokio::select! {
            read = stdin.read(&mut buffer) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = controller.send_audio(buffer[..n].to_vec());
                    }
                    Err(e) => {
                        log::warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupt received, stopping");
                break;
            }
        }
    }

    if let Err(e) = controller
        .execute(IpcCommand::StopListening { correlation_id })
        .await
    {
        log::warn!("Stop failed: {}", e);
    }
    printer.abort();
    Ok(())
}
