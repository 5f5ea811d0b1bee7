use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use yoyo_companion::chat::{ChatSession, InlineImage, UploadedFile};
use yoyo_companion::store::{self, StateRepo};
use yoyo_companion::voice::{
    AudioPlayer, AudioSink, CpalSink, NullSink, PlaybackState, SpeechClient, Synthesizer,
};
use yoyo_companion::{Config, HttpChatTransport, TerminalSurface, TextAnimator};

/// Yoyo - streaming chat companion with synthesized speech playback
#[derive(Parser)]
#[command(name = "yoyo", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "YOYO_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice output (for headless machines without audio hardware)
    #[arg(long, env = "YOYO_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message and play the reply
    Say {
        /// Message text
        text: String,
        /// Attach an image file
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Show or change the persisted speech preference
    Speech {
        /// "on", "off", or "status"
        #[arg(default_value = "status")]
        action: String,
    },
    /// Show the resolved configuration and client state
    Status,
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is Yoyo testing the speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; logs go to stderr so they never
    // interleave with the chat transcript
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,yoyo_companion=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_options(cli.config, cli.disable_voice)?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Say { text, image } => say(&config, &text, image.as_deref()).await,
            Command::Speech { action } => cmd_speech(&config, &action),
            Command::Status => cmd_status(&config),
            Command::TestSpeaker => test_speaker(),
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    chat_loop(&config).await
}

/// Wire the session up from configuration
///
/// The returned player is a handle onto the same playback state the session
/// drives; the prompt loop uses it for pause and resume.
fn build_session(config: &Config) -> anyhow::Result<(ChatSession, AudioPlayer)> {
    let state = StateRepo::new(store::init(&config.state_db_path)?);

    let transport = Arc::new(HttpChatTransport::new(&config.endpoint)?);
    let synth = Arc::new(SpeechClient::new(&config.endpoint)?);

    let sink: Arc<dyn AudioSink> = if config.voice.enabled {
        match CpalSink::new() {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::warn!(error = %e, "audio device unavailable, replies will be silent");
                Arc::new(NullSink)
            }
        }
    } else {
        Arc::new(NullSink)
    };
    let player = AudioPlayer::new(sink);

    let animator = TextAnimator::new(Arc::new(TerminalSurface), &config.render);

    let session = ChatSession::new(
        config.endpoint.clone(),
        transport,
        synth,
        player.clone(),
        animator,
        state,
    )?;
    Ok((session, player))
}

/// Interactive prompt loop
#[allow(clippy::future_not_send)]
async fn chat_loop(config: &Config) -> anyhow::Result<()> {
    let (mut session, player) = build_session(config)?;

    println!("Yoyo is listening. /image <path> [text] attaches a picture,");
    println!("/speech on|off controls the voice, /pause toggles playback, /quit leaves.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        if let Some(command) = line.strip_prefix('/') {
            match handle_command(command, &mut session, &player).await? {
                Flow::Continue => continue,
                Flow::Quit => break,
            }
        }

        send_and_render(&mut session, line, None).await?;
    }

    println!("bye!");
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

/// Dispatch one slash command from the prompt
async fn handle_command(
    command: &str,
    session: &mut ChatSession,
    player: &AudioPlayer,
) -> anyhow::Result<Flow> {
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "quit" | "exit" => return Ok(Flow::Quit),
        "speech" => match rest.trim() {
            "on" => {
                session.set_speech_enabled(true)?;
                println!("speech on");
            }
            "off" => {
                session.set_speech_enabled(false)?;
                println!("speech off");
            }
            _ => {
                let status = if session.speech_enabled() { "on" } else { "off" };
                println!("speech is {status}");
            }
        },
        "pause" => player.toggle()?,
        "image" => {
            let rest = rest.trim();
            let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            if path.is_empty() {
                println!("usage: /image <path> [text]");
                return Ok(Flow::Continue);
            }
            match UploadedFile::from_path(Path::new(path))
                .and_then(UploadedFile::into_inline_image)
            {
                Ok(image) => send_and_render(session, caption, Some(image)).await?,
                Err(e) => println!("can't attach {path}: {e}"),
            }
        }
        _ => println!("commands: /image <path> [text], /speech on|off, /pause, /quit"),
    }
    Ok(Flow::Continue)
}

/// Send one message and paint the reply behind a `yoyo>` prefix
async fn send_and_render(
    session: &mut ChatSession,
    message: &str,
    image: Option<InlineImage>,
) -> anyhow::Result<()> {
    if message.trim().is_empty() && image.is_none() {
        return Ok(());
    }

    print!("yoyo> ");
    std::io::stdout().flush()?;

    session.send(message, image).await?;
    println!();
    Ok(())
}

/// Send one message from the command line, then wait for playback to finish
#[allow(clippy::future_not_send)]
async fn say(config: &Config, text: &str, image_path: Option<&Path>) -> anyhow::Result<()> {
    let (mut session, player) = build_session(config)?;

    let image = image_path
        .map(|p| UploadedFile::from_path(p).and_then(UploadedFile::into_inline_image))
        .transpose()?;

    print!("yoyo> ");
    std::io::stdout().flush()?;
    session.send(text, image).await?;
    println!();

    // Let the reply finish sounding before exiting
    while player.state() == PlaybackState::Playing {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

/// Show or change the persisted speech preference
fn cmd_speech(config: &Config, action: &str) -> anyhow::Result<()> {
    let state = StateRepo::new(store::init(&config.state_db_path)?);
    match action {
        "on" => {
            state.set_speech_enabled(true)?;
            println!("Speech enabled");
        }
        "off" => {
            state.set_speech_enabled(false)?;
            println!("Speech disabled");
        }
        "status" => {
            let status = if state.speech_enabled()? { "on" } else { "off" };
            println!("Speech is {status}");
        }
        other => anyhow::bail!("unknown speech action: {other} (expected on, off, or status)"),
    }
    Ok(())
}

/// Show the resolved configuration and client state
fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let state = StateRepo::new(store::init(&config.state_db_path)?);

    println!("chat endpoint:    {}", config.endpoint.chat_url);
    println!("speech endpoint:  {}", config.endpoint.speech_url);
    println!("transport mode:   {}", config.endpoint.mode.as_str());
    println!("payload kind:     {}", config.endpoint.payload.as_str());
    println!("animator:         {}", config.render.animator.as_str());
    println!(
        "voice output:     {}",
        if config.voice.enabled { "enabled" } else { "disabled" }
    );
    println!("state db:         {}", config.state_db_path.display());
    println!("user id:          {}", state.user_id()?);
    println!(
        "speech pref:      {}",
        if state.speech_enabled()? { "on" } else { "off" }
    );
    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = CpalSink::new()?;
    sink.play_tone(440.0, Duration::from_secs(2))?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test speech synthesis end to end
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing speech synthesis with text: \"{text}\"\n");

    let synth = SpeechClient::new(&config.endpoint)?;
    println!("Synthesizing speech...");
    let mp3_data = synth.synthesize_text(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    // Check MP3 header
    if mp3_data.len() > 3 {
        println!(
            "First 4 bytes: {:02x} {:02x} {:02x} {:02x}",
            mp3_data[0], mp3_data[1], mp3_data[2], mp3_data[3]
        );
    }

    println!("Playing audio...");
    let player = AudioPlayer::new(Arc::new(CpalSink::new()?));
    player.play(mp3_data, true)?;
    while player.state() == PlaybackState::Playing {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\n---");
    println!("If you heard the speech, synthesis is working!");

    Ok(())
}
