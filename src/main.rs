use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::info;

use classchat::api::events::connect_push;
use classchat::attachments::{AttachmentPreparer, StagedFile};
use classchat::bridge::NotificationBridge;
use classchat::compose::{Composer, open_chat};
use classchat::download::{DownloadRequest, FileDownloader};
use classchat::notice::{LogNotifier, Notice, Notifier};
use classchat::render::{Alignment, ConversationRow, MessageView, ThreadView};
use classchat::utils::{RUNTIME, normalize_url};
use classchat::{ApiClient, CacheKey, ChatConfig, ConversationStore, OutgoingMessage, Upload};

#[derive(Parser)]
#[command(name = "classchat", about = "Classroom chat from the terminal")]
struct Cli {
    /// Use this config file instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List conversations, newest activity first.
    List,
    /// Print one conversation.
    Show { id: String },
    /// Find or create the conversation with a user and print its id.
    Open { user_id: String },
    /// Send text, files or a pre-recorded voice note.
    Send {
        id: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        #[arg(long)]
        caption: Option<String>,
        #[arg(long, requires = "duration")]
        voice: Option<PathBuf>,
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Listen for push notifications and refresh the conversation list on each one.
    Listen,
    /// Record a voice note from the default microphone and send it.
    #[cfg(feature = "audio")]
    Record {
        id: String,
        /// Stop after this many seconds; Ctrl-C stops early.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Play a WAV voice note on the default speaker.
    #[cfg(feature = "audio")]
    Play { path: PathBuf },
    /// Save an attachment into the download dir.
    Download { url: String, file_name: String },
    /// Show or update the saved settings.
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    push_url: Option<String>,
    #[arg(long)]
    viewer_id: Option<String>,
    #[arg(long)]
    max_upload_mb: Option<u64>,
    #[arg(long)]
    download_dir: Option<PathBuf>,
}

/// Boxed errors keep the binary's plumbing short; the library has typed errors.
type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn load_config(path: Option<&PathBuf>) -> CliResult<ChatConfig> {
    match path {
        Some(p) if p.exists() => Ok(ChatConfig::load_from(p)?),
        Some(_) => Ok(ChatConfig::new()),
        None => Ok(ChatConfig::load()),
    }
}

fn configure(config: &mut ChatConfig, args: &ConfigArgs, path: Option<&PathBuf>) -> CliResult<()> {
    let before = config.clone();
    if let Some(v) = &args.base_url {
        config.base_url = normalize_url(v);
    }
    if let Some(v) = &args.token {
        config.token = Some(v.clone());
    }
    if let Some(v) = &args.push_url {
        config.push_url = Some(v.clone());
    }
    if let Some(v) = &args.viewer_id {
        config.viewer_id = Some(v.clone());
    }
    if let Some(v) = args.max_upload_mb {
        config.max_upload_mb = v;
    }
    if let Some(v) = &args.download_dir {
        config.download_dir = Some(v.clone());
    }
    if *config != before {
        match path {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn print_thread(view: &ThreadView) {
    println!("# {} ({})", view.title, view.conversation_id);
    for row in &view.rows {
        let body = match &row.view {
            MessageView::Text(text) => text.clone(),
            MessageView::Voice(v) => format!(
                "[voice {}] {}",
                v.duration_label.as_deref().unwrap_or("--:--"),
                v.url
            ),
            MessageView::Media(m) => format!("[{:?}] {} {}", m.kind, m.file_name, m.url),
            MessageView::File(f) => format!(
                "[file {}{}] {}",
                f.file_name,
                f.size_label.as_deref().map(|s| format!(", {s}")).unwrap_or_default(),
                f.url
            ),
        };
        let marker = match row.alignment {
            Alignment::Outgoing => ">",
            Alignment::Incoming => "<",
        };
        println!("{} {:>5} {}: {}", marker, row.time_label, row.sender_name, body);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut config = load_config(cli.config.as_ref())?;

    if let Command::Config(args) = &cli.command {
        return configure(&mut config, args, cli.config.as_ref());
    }

    if !config.is_configured() {
        return Err("No server configured. Run `classchat config --base-url <url>` first.".into());
    }

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let store = Arc::new(ConversationStore::new(ApiClient::new(&config)?));
    let viewer = config.viewer_id.clone().unwrap_or_default();

    match cli.command {
        Command::List => {
            for conversation in store.list_conversations().await? {
                let row = ConversationRow::new(&conversation, config.viewer_id.as_deref());
                println!(
                    "{}{:>6}  {:<24} {}",
                    if row.unread { "*" } else { " " },
                    row.id,
                    row.title,
                    row.preview
                );
            }
        }
        Command::Show { id } => match store.get_conversation(Some(&id)).await? {
            Some(page) => print_thread(&ThreadView::new(&page, &viewer)),
            None => return Err("No conversation selected".into()),
        },
        Command::Open { user_id } => match open_chat(&store, notifier.as_ref(), &user_id).await {
            Some(id) => println!("{id}"),
            None => return Err(format!("Could not open a chat with user {user_id}").into()),
        },
        Command::Send {
            id,
            text,
            files,
            caption,
            voice,
            duration,
        } => {
            let composer = Composer::new(store.clone(), notifier.clone(), id.clone());
            if let Some(text) = text {
                composer.send_text(&text).await?;
            }
            if !files.is_empty() {
                let preparer = AttachmentPreparer::from_config(&config);
                let mut staged = Vec::with_capacity(files.len());
                for path in &files {
                    staged.push(StagedFile::from_path(path).await?);
                }
                preparer.stage(staged)?;
                composer.send_staged(&preparer, caption).await?;
            }
            if let (Some(path), Some(duration_secs)) = (voice, duration) {
                let file = StagedFile::from_path(&path).await?;
                let mime_type = if file.mime_type.starts_with("video/webm") {
                    "audio/webm".to_string()
                } else {
                    file.mime_type
                };
                store
                    .send(
                        &id,
                        OutgoingMessage::Voice {
                            audio: Upload {
                                file_name: file.name,
                                mime_type,
                                bytes: file.bytes,
                            },
                            duration_secs,
                        },
                    )
                    .await?;
            }
            info!("sent to conversation {}", id);
        }
        Command::Listen => {
            let push_url = config
                .push_url
                .clone()
                .ok_or("No push_url configured")?;
            let stream = connect_push(&push_url).await?;
            let mut bridge = NotificationBridge::new(store.clone(), notifier.clone());
            bridge.attach(stream);
            let mut changes = store.subscribe();
            notifier.notify(Notice::info(format!("Listening on {push_url}")));
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    _ = bridge.finished() => break,
                    key = changes.recv() => {
                        if matches!(key, Ok(CacheKey::Conversations)) {
                            match store.list_conversations().await {
                                Ok(list) => println!("{} conversation(s)", list.len()),
                                Err(e) => notifier.notify(Notice::error(format!("Failed to load chats: {e}"))),
                            }
                        }
                    }
                    _ = &mut ctrl_c => break,
                }
            }
        }
        #[cfg(feature = "audio")]
        Command::Record { id, seconds } => record(store.clone(), notifier.clone(), id, seconds).await?,
        #[cfg(feature = "audio")]
        Command::Play { path } => play(&path).await?,
        Command::Download { url, file_name } => {
            let downloader = FileDownloader::new(config.download_dir(), notifier.clone());
            let path = downloader.fetch(&DownloadRequest::new(url, file_name)).await?;
            println!("saved {}", path.display());
        }
        Command::Config(_) => {}
    }
    Ok(())
}

#[cfg(feature = "audio")]
async fn record(
    store: Arc<ConversationStore<ApiClient>>,
    notifier: Arc<dyn Notifier>,
    id: String,
    seconds: u64,
) -> CliResult<()> {
    use classchat::audio::device::CpalMicrophone;
    use classchat::recorder::VoiceRecorder;

    let composer = Composer::new(store, notifier, id.clone());
    let mut recorder = VoiceRecorder::new(CpalMicrophone);
    composer.start_recording(&mut recorder).await?;
    println!("recording, Ctrl-C to stop early");
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    composer.send_voice(&mut recorder).await?;
    info!("voice note sent to conversation {}", id);
    Ok(())
}

#[cfg(feature = "audio")]
async fn play(path: &std::path::Path) -> CliResult<()> {
    use classchat::audio::device::PlaybackDevice;
    use classchat::audio::pcm::PcmTrack;
    use classchat::render::voice::{AudioElement, VoicePlayer};

    let bytes = tokio::fs::read(path).await?;
    let track = PcmTrack::from_wav(&bytes)?;
    let device = PlaybackDevice::open(track.clone()).await?;
    let mut player = VoicePlayer::new(track, &path.display().to_string(), None);
    player.toggle();

    let mut ticks = tokio::time::interval(std::time::Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while player.element().is_playing() {
        tokio::select! {
            _ = ticks.tick() => {
                let view = player.view();
                println!("{} / {}", view.elapsed_label, view.total_label);
            }
            _ = &mut ctrl_c => break,
        }
    }
    device.close();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("classchat=info")).init();
    let cli = Cli::parse();
    if let Err(e) = RUNTIME.block_on(run(cli)) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
