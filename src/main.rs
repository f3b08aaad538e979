use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::providers::{
    CredentialStore, LayeredKeyStore, LocalKeyStore, MemoryKeyStore, names,
};
use beacon_voice::recognition::{CloudRecognizer, Transcriber};
use beacon_voice::synthesis::{
    AudioSink, CpalSink, LocalTtsProvider, ProviderId, RemoteTtsProvider, SynthesisProvider,
    SynthesisProviderChain,
};
use beacon_voice::voice::{
    CaptureEvent, ControllerEvent, ListeningState, SpeechCaptureEngine, SpeechEvent,
    SpeechOutputEngine, VoiceInteractionController,
};
use beacon_voice::{Config, db};

/// Beacon Voice - hands-free voice conversation pipeline
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen continuously and print each utterance (default)
    Listen {
        /// Speak each utterance back
        #[arg(long)]
        echo: bool,
        /// Stop after the first utterance
        #[arg(long)]
        single_shot: bool,
    },
    /// Speak text through the provider chain
    Say {
        /// Text to speak
        text: String,
        /// Provider to try first ("primary" or "secondary")
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// List voices offered by the local speech engine
    Voices,
    /// Manage stored provider API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Store an API key
    Set {
        /// Provider name (elevenlabs, openai, google, deepgram)
        provider: String,
        /// API key
        key: String,
    },
    /// Remove a stored API key
    Remove {
        /// Provider name
        provider: String,
    },
    /// List providers with a key
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Listen {
        echo: false,
        single_shot: false,
    }) {
        Command::Listen { echo, single_shot } => listen(&config, echo, single_shot).await,
        Command::Say { text, provider } => say(&config, &text, provider.as_deref()).await,
        Command::Voices => voices(&config).await,
        Command::Keys { action } => keys(&config, action),
    }
}

/// Stored keys plus keys from env and the config file; env/config win
fn credentials(config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let pool = db::init(config.db_path())?;
    Ok(Arc::new(LayeredKeyStore::new(vec![
        Arc::new(MemoryKeyStore::from_api_keys(&config.api_keys)),
        Arc::new(LocalKeyStore::new(pool)),
    ])))
}

fn build_chain(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
) -> anyhow::Result<SynthesisProviderChain> {
    let sink: Arc<dyn AudioSink> = Arc::new(CpalSink::new());
    let remote = RemoteTtsProvider::new(
        config.synthesis.remote.clone(),
        credentials,
        Arc::clone(&sink),
    )?;
    let local = LocalTtsProvider::new(config.synthesis.local.clone(), sink);

    if !CpalSink::has_output_device() {
        tracing::warn!("no audio output device found; speech will fail");
    }

    Ok(SynthesisProviderChain::with_order(
        vec![
            Arc::new(remote) as Arc<dyn SynthesisProvider>,
            Arc::new(local) as Arc<dyn SynthesisProvider>,
        ],
        config.synthesis.order.clone(),
    ))
}

fn output_engine(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
    preferred: Option<ProviderId>,
) -> anyhow::Result<(SpeechOutputEngine, tokio::sync::mpsc::UnboundedReceiver<SpeechEvent>)> {
    let chain = build_chain(config, credentials)?;
    let (output, speech_rx) = SpeechOutputEngine::new(Arc::new(chain));
    output.set_preferred_provider(preferred.or(config.synthesis.preferred));
    Ok((output, speech_rx))
}

async fn listen(config: &Config, echo: bool, single_shot: bool) -> anyhow::Result<()> {
    let credentials = credentials(config)?;

    let transcriber = Transcriber::new(
        config.recognition.backend,
        config.recognition.model.clone(),
        Arc::clone(&credentials),
    );
    let capability = CloudRecognizer::detect(config.recognition.recognizer(), transcriber);

    let mut capture_config = config.capture.clone();
    if single_shot {
        capture_config.continuous = false;
    }
    let capture = SpeechCaptureEngine::new(capability, capture_config);
    let (output, speech_rx) = output_engine(config, credentials, None)?;

    let responder = output.clone();
    let consumer = move |text: &str| {
        println!("> {text}");
        if echo {
            responder.speak(text);
        }
    };
    let mut controller =
        VoiceInteractionController::new(capture, output, speech_rx).with_consumer(Arc::new(consumer));

    if let Err(e) = controller.toggle_listening().await {
        // The controller queued an actionable notice for these
        if e.requires_user_action()
            && let Some(ControllerEvent::Notice(notice)) = controller.next_event().await
        {
            eprintln!("{notice}");
        }
        return Err(e.into());
    }
    println!("Listening... (Ctrl+C to stop)");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = controller.next_event() => event,
        };
        let Some(event) = event else { break };

        match event {
            ControllerEvent::Capture(CaptureEvent::Transcript(snapshot)) => {
                tracing::debug!(preview = %snapshot.preview(), "transcript");
            }
            ControllerEvent::Capture(CaptureEvent::Failed(e)) => {
                eprintln!("Listening stopped: {e}");
            }
            ControllerEvent::Capture(CaptureEvent::StateChanged(ListeningState::Idle))
                if !single_shot =>
            {
                println!("Stopped listening");
                break;
            }
            ControllerEvent::Speech(SpeechEvent::Failed { error, .. }) => {
                eprintln!("Could not speak: {error}");
            }
            ControllerEvent::Notice(notice) => eprintln!("{notice}"),
            _ => {}
        }

        // Single-shot ends once capture is idle and any echo has finished,
        // whether or not anything was heard
        if single_shot && controller.is_idle() {
            break;
        }
    }

    controller.stop_listening();
    controller.stop_speaking();
    Ok(())
}

async fn say(config: &Config, text: &str, provider: Option<&str>) -> anyhow::Result<()> {
    let preferred = provider.map(str::parse::<ProviderId>).transpose()?;
    let (output, mut speech_rx) = output_engine(config, credentials(config)?, preferred)?;

    if !output.speak(text) {
        anyhow::bail!("nothing to say");
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                output.stop();
                return Ok(());
            }
            event = speech_rx.recv() => event,
        };
        match event {
            Some(SpeechEvent::Started { provider, .. }) => {
                tracing::info!(provider = %provider, "speaking");
            }
            Some(SpeechEvent::Notice(notice)) => eprintln!("{notice}"),
            Some(SpeechEvent::Ended { .. }) | None => return Ok(()),
            Some(SpeechEvent::Failed { error, .. }) => return Err(error.into()),
            Some(_) => {}
        }
    }
}

async fn voices(config: &Config) -> anyhow::Result<()> {
    let local = LocalTtsProvider::new(config.synthesis.local.clone(), Arc::new(CpalSink::new()));
    let Some(path) = local.engine_path() else {
        anyhow::bail!("{} is not installed", config.synthesis.local.binary);
    };

    println!("Local engine: {}", path.display());
    for voice in local.voices().await? {
        println!("  {:<12} {:<28} {}", voice.language, voice.name, voice.identifier);
    }
    println!(
        "Remote: {:?} voice {} (model {})",
        config.synthesis.remote.backend,
        config.synthesis.remote.voice_id,
        config.synthesis.remote.model_id
    );
    Ok(())
}

fn keys(config: &Config, action: KeysAction) -> anyhow::Result<()> {
    let store = LocalKeyStore::new(db::init(config.db_path())?);

    match action {
        KeysAction::Set { provider, key } => {
            if !names::ALL.contains(&provider.as_str()) {
                anyhow::bail!(
                    "unknown provider {provider}; expected one of {}",
                    names::ALL.join(", ")
                );
            }
            store.set(&provider, &key)?;
            println!("Stored key for {provider}");
        }
        KeysAction::Remove { provider } => {
            store.remove(&provider)?;
            println!("Removed key for {provider}");
        }
        KeysAction::List => {
            let env_keys = MemoryKeyStore::from_api_keys(&config.api_keys);
            for name in env_keys.list_configured()? {
                println!("{name} (environment/config)");
            }
            for name in store.list_configured()? {
                println!("{name} (stored)");
            }
        }
    }
    Ok(())
}
