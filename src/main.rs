use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use vocata_realtime::api::{
    ApiClient, CharacterQuery, CharacterResponse, CreateConversationRequest, LoginRequest,
    SenderType,
};
use vocata_realtime::{
    AudioCaptureDevice, AudioSink, CapturePolicy, ChannelCaptureDevice, ClientConfig,
    ConnectionStatus, ConversationOrchestrator, FileSink, NullSink, PermissionState,
    ServerMessage, TokenStore, WavFileCapture,
};

/// VocaTa realtime client - voice and text conversations from the terminal
#[derive(Parser, Debug)]
#[command(name = "vocata-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and print the access token
    Login {
        /// Email or nickname
        #[arg(short = 'u', long = "user")]
        login_name: String,

        #[arg(short = 'p', long = "password")]
        password: String,
    },

    /// Browse characters to start a conversation with
    Characters {
        /// Search by keyword instead of listing
        #[arg(short = 's', long = "search")]
        search: Option<String>,

        /// Show the featured selection
        #[arg(long = "featured", conflicts_with = "search")]
        featured: bool,

        #[arg(long = "page", default_value_t = 1)]
        page: u32,

        #[arg(short = 'n', long = "limit", default_value_t = 10)]
        limit: u32,
    },

    /// List your conversations
    Conversations,

    /// Start a new conversation with a character
    Create {
        /// Character id
        character_id: i64,

        #[arg(short = 't', long = "title")]
        title: Option<String>,
    },

    /// Show the latest messages of a conversation
    Messages {
        conversation: String,

        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: u32,
    },

    /// Open a realtime session; type messages or /record, /stop, /call, /hangup,
    /// /mode vad|full, /level, /quit
    Chat {
        /// Conversation UUID
        conversation: String,

        /// 16-bit PCM WAV file used as the microphone
        #[arg(long = "wav", value_name = "FILE")]
        wav: Option<PathBuf>,

        /// Append received reply audio to this file
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,

        /// Send each recording as one utterance instead of VAD-gated streaming
        #[arg(long = "full-utterance")]
        full_utterance: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let tokens = Arc::new(TokenStore::new());
    if let Some(token) = config.token.as_deref() {
        tokens.set_token(token, None);
    }

    let api = ApiClient::new(&config.api_url, tokens.clone())?;

    match cli.command {
        Commands::Login {
            login_name,
            password,
        } => {
            let response = api
                .login(&LoginRequest {
                    login_name,
                    password,
                    remember_me: true,
                })
                .await?;
            if let Some(user) = response.user.as_ref().and_then(|u| u.nickname.as_deref()) {
                println!("Logged in as {user}");
            }
            println!("export VOCATA_TOKEN={}", response.token);
        }
        Commands::Characters {
            search,
            featured,
            page,
            limit,
        } => {
            let characters = if featured {
                api.featured_characters(Some(limit)).await?
            } else {
                let query = CharacterQuery {
                    keyword: search.clone(),
                    page_num: page,
                    page_size: limit,
                    ..Default::default()
                };
                let result = if search.is_some() {
                    api.search_characters(&query).await?
                } else {
                    api.list_public_characters(&query).await?
                };
                if result.total_pages > 1 {
                    println!(
                        "page {}/{} ({} total)",
                        result.page_num, result.total_pages, result.total
                    );
                }
                result.list
            };
            print_characters(&characters);
        }
        Commands::Conversations => {
            let conversations = api.list_conversations().await?;
            if conversations.is_empty() {
                println!("No conversations");
            }
            for conversation in conversations {
                println!(
                    "{}  {}  [{}]",
                    conversation.conversation_uuid,
                    conversation.title.as_deref().unwrap_or("(untitled)"),
                    conversation.character_name.as_deref().unwrap_or("?"),
                );
            }
        }
        Commands::Create {
            character_id,
            title,
        } => {
            let conversation = api
                .create_conversation(&CreateConversationRequest {
                    character_id,
                    title,
                })
                .await?;
            println!("{}", conversation.conversation_uuid);
        }
        Commands::Messages {
            conversation,
            limit,
        } => {
            for message in api.get_recent_messages(&conversation, Some(limit)).await? {
                let who = match message.sender() {
                    Some(SenderType::User) => "you",
                    Some(SenderType::Character) => "character",
                    _ => "?",
                };
                println!("[{who}] {}", message.text_content.as_deref().unwrap_or(""));
            }
        }
        Commands::Chat {
            conversation,
            wav,
            output,
            full_utterance,
        } => {
            let mut chat_config = config.chat_config();
            if full_utterance {
                chat_config.capture.policy = CapturePolicy::FullUtterance;
            }
            run_chat(chat_config, tokens, &conversation, wav, output).await?;
        }
    }

    Ok(())
}

fn print_characters(characters: &[CharacterResponse]) {
    if characters.is_empty() {
        println!("No characters");
    }
    for character in characters {
        println!(
            "{:>8}  {}  {}",
            character.id,
            character.name,
            character.description.as_deref().unwrap_or(""),
        );
    }
}

async fn run_chat(
    config: vocata_realtime::ChatConfig,
    tokens: Arc<TokenStore>,
    conversation: &str,
    wav: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let device: Arc<dyn AudioCaptureDevice> = match wav {
        Some(path) => Arc::new(WavFileCapture::new(path)),
        None => {
            let device = ChannelCaptureDevice::new(16);
            device.set_permission_denied(true);
            Arc::new(device)
        }
    };
    let sink: Arc<dyn AudioSink> = match output {
        Some(path) => Arc::new(FileSink::new(path)),
        None => Arc::new(NullSink::new()),
    };

    let chat = ConversationOrchestrator::new(config, tokens, device, sink);

    chat.on_stt_result(|text, is_final| {
        if is_final {
            println!("you> {text}");
        }
    });
    chat.on_llm_stream(|text, is_complete, character| {
        if is_complete {
            println!("{}> {text}", character.unwrap_or("assistant"));
        }
    });
    chat.on_audio_play(|playing| {
        tracing::debug!("Playback {}", if playing { "started" } else { "idle" });
    });
    chat.on_connection_status(|status, detail| match status {
        ConnectionStatus::Connected => println!("* connected: {detail}"),
        ConnectionStatus::Disconnected => println!("* disconnected: {detail}"),
        ConnectionStatus::Error => eprintln!("* error: {detail}"),
    });
    chat.on_message(|message| {
        if let ServerMessage::Complete { .. } = message {
            tracing::debug!("Turn complete");
        }
    });

    chat.initialize(conversation).await?;
    if chat.microphone_permission().await == PermissionState::Denied {
        println!("* no microphone; start with --wav <file> to record");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                let result = match line {
                    "" => Ok(()),
                    "/quit" => break,
                    "/record" => chat.start_recording().await,
                    "/stop" => chat.stop_recording().await,
                    "/call" => chat.start_audio_call().await,
                    "/hangup" => chat.stop_audio_call().await,
                    "/level" => {
                        println!("* input level {:.1}", chat.input_level());
                        Ok(())
                    }
                    mode if mode.starts_with("/mode") => {
                        match mode.trim_start_matches("/mode").parse::<CapturePolicy>() {
                            Ok(policy) => {
                                chat.capture().set_policy(policy);
                                println!("* next recording uses {policy}");
                            }
                            Err(e) => eprintln!("! {e}"),
                        }
                        Ok(())
                    }
                    text => chat.send_text_message(text),
                };
                if let Err(e) = result {
                    if e.is_permission_denied() {
                        eprintln!("! no microphone: start with --wav <file> to record");
                    } else {
                        eprintln!("! {e}");
                    }
                }
            }
        }
    }

    chat.destroy().await;
    Ok(())
}
