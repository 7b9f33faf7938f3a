use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use issueboard::board::Board;
use issueboard::error::{ErrorCode, Severity, notification_line};
use issueboard::github::{Message, StoreError};
use issueboard::services::ChatError;
use issueboard::services::dashboard::ChatSummary;
use issueboard::services::poller::{PollEvent, Poller};
use issueboard::services::session::{AuthError, AuthStatus, TokenProvider};
use issueboard::services::session_store::{FileSessionStore, SessionStoreError};
use issueboard::settings::{BoardSettings, RepoRef, SettingsError};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),
    #[error("no chat selected; pass --chat or run `chat open --key <secret>`")]
    NoChatSelected,
    #[error("no active chat matches that key")]
    UnknownKey,
    #[error("waiting for ctrl-c failed: {0}")]
    Signal(String),
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Settings(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Auth(e) => e.error_code(),
            Self::Chat(e) => e.error_code(),
            Self::SessionStore(e) => e.error_code(),
            Self::NoChatSelected => "E_CLI_NO_CHAT",
            Self::UnknownKey => "E_CLI_UNKNOWN_KEY",
            Self::Signal(_) => "E_CLI_SIGNAL",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            Self::Auth(e) => e.retryable(),
            Self::Chat(e) => e.retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Store(e) => e.severity(),
            Self::Auth(e) => e.severity(),
            Self::Chat(e) => e.severity(),
            Self::NoChatSelected | Self::UnknownKey => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "issueboard", about = "Message board persisted in GitHub issues")]
struct Cli {
    /// Backing repository as owner/name.
    #[arg(long, env = "BOARD_REPO")]
    repo: String,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in as the board admin. The first login on an empty repository creates the admin.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Status,
    /// Validate a GitHub token and keep it in the session.
    Token { value: String },
    Key(KeyCommand),
    Admin(AdminCommand),
    Chat(ChatCommand),
    Dashboard {
        #[arg(long, default_value_t = false)]
        watch: bool,
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct KeyCommand {
    #[command(subcommand)]
    command: KeySubcommand,
}

#[derive(Subcommand, Debug)]
enum KeySubcommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        key: String,
    },
    List {
        /// Include deleted chats.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    Delete { id: u64 },
}

#[derive(Args, Debug)]
struct AdminCommand {
    #[command(subcommand)]
    command: AdminSubcommand,
}

#[derive(Subcommand, Debug)]
enum AdminSubcommand {
    Password {
        #[arg(long)]
        new: String,
        #[arg(long)]
        confirm: String,
    },
    Overview,
}

#[derive(Args, Debug)]
struct ChatCommand {
    #[command(subcommand)]
    command: ChatSubcommand,
}

#[derive(Subcommand, Debug)]
enum ChatSubcommand {
    /// Select the chat whose secret key matches.
    Open {
        #[arg(long)]
        key: String,
    },
    History {
        #[arg(long)]
        chat: Option<u64>,
    },
    Send {
        #[arg(long)]
        chat: Option<u64>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    Watch {
        #[arg(long)]
        chat: Option<u64>,
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", notification_line(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let repo: RepoRef = cli.repo.parse()?;
    let mut settings = BoardSettings::from_env_for(repo);
    if let Some(token) = cli.token.filter(|t| !t.trim().is_empty()) {
        settings.token = Some(token);
    }

    let store = Arc::new(FileSessionStore::new(settings.session_file.clone()));
    let board = Board::connect(settings, store)?;
    board.session.restore()?;
    if let Some(token) = &board.settings.token {
        board.session.adopt_token(token);
    }

    match cli.command {
        Command::Login { username, password } => {
            let identity = board.session.login(&username, &password).await?;
            println!("logged in as {}", identity.username);
        }
        Command::Logout => {
            board.session.logout("user request")?;
            println!("logged out");
        }
        Command::Status => print_status(&board),
        Command::Token { value } => {
            let login = board.session.set_token(&value).await?;
            println!("token accepted for {login}");
        }
        Command::Key(key) => run_key(&board, key).await?,
        Command::Admin(admin) => run_admin(&board, admin).await?,
        Command::Chat(chat) => run_chat(&board, chat).await?,
        Command::Dashboard { watch, interval_ms } => run_dashboard(&board, watch, interval_ms).await?,
    }
    Ok(())
}

fn print_status(board: &Board) {
    println!("repository: {}", board.settings.repo);
    match (board.session.check_auth(), board.session.identity()) {
        (AuthStatus::Authorized, Some(identity)) => println!("admin: {} (active)", identity.username),
        (AuthStatus::Expired, _) => println!("admin: session expired"),
        _ => println!("admin: not logged in"),
    }
    let token = if board.session.read_token().is_some() { "present" } else { "missing" };
    println!("token: {token}");
    match board.session.current_chat() {
        Some(id) => println!("current chat: #{id}"),
        None => println!("current chat: none"),
    }
}

async fn run_key(board: &Board, key: KeyCommand) -> Result<(), CliError> {
    match key.command {
        KeySubcommand::Create { name, key } => {
            let record = board.registry.create(&name, &key).await?;
            println!("created chat #{} \"{}\"", record.id, record.name);
        }
        KeySubcommand::List { all } => {
            let chats = if all { board.registry.list_all().await? } else { board.registry.list().await? };
            if chats.is_empty() {
                println!("no chats");
            }
            for chat in chats {
                let state = if chat.active { "active" } else { "deleted" };
                println!("#{}\t{}\t{}\t{}\t{state}", chat.id, chat.name, chat.secret_key, timestamp(chat.created_at));
            }
        }
        KeySubcommand::Delete { id } => {
            board.registry.soft_delete(id).await?;
            println!("chat #{id} deleted; its history stays on the issue");
        }
    }
    Ok(())
}

async fn run_admin(board: &Board, admin: AdminCommand) -> Result<(), CliError> {
    match admin.command {
        AdminSubcommand::Password { new, confirm } => {
            board.admin.change_password(&new, &confirm).await?;
            println!("password changed");
        }
        AdminSubcommand::Overview => {
            let overview = board.admin.overview().await?;
            println!("admin: {}", overview.username.as_deref().unwrap_or("<unreadable>"));
            println!("repository: {}", overview.repository);
            println!("config issue: #{}", overview.config_issue);
            println!("chats: {} active / {} total", overview.active_chats, overview.total_chats);
            println!("created: {}", timestamp(overview.created_at));
            if let Some(updated) = overview.updated_at {
                println!("updated: {}", timestamp(updated));
            }
        }
    }
    Ok(())
}

async fn run_chat(board: &Board, chat: ChatCommand) -> Result<(), CliError> {
    match chat.command {
        ChatSubcommand::Open { key } => {
            let record = board.registry.find_by_key(&key).await?.ok_or(CliError::UnknownKey)?;
            board.session.select_chat(record.id)?;
            println!("opened chat #{} \"{}\"", record.id, record.name);
        }
        ChatSubcommand::History { chat } => {
            let id = resolve_chat(board, chat).await?;
            let messages = board.channel.fetch(id).await?;
            if messages.is_empty() {
                println!("no messages yet");
            }
            for message in &messages {
                print_message(message);
            }
        }
        ChatSubcommand::Send { chat, text } => {
            let id = resolve_chat(board, chat).await?;
            board.channel.send(id, &text.join(" ")).await?;
            println!("sent");
        }
        ChatSubcommand::Watch { chat, interval_ms } => {
            let id = resolve_chat(board, chat).await?;
            let poller = Poller::new(board.channel.clone());
            poller.start(id, interval(board, interval_ms), |event| match event {
                PollEvent::Update { fresh, .. } => fresh.iter().for_each(print_message),
                PollEvent::Failed(e) => eprintln!("{}", notification_line(&e)),
            });
            wait_for_ctrl_c().await?;
            poller.stop_all();
        }
    }
    Ok(())
}

async fn run_dashboard(board: &Board, watch: bool, interval_ms: Option<u64>) -> Result<(), CliError> {
    if !watch {
        let stats = board.dashboard.stats().await?;
        println!(
            "keys: {}  active chats: {}  messages: {}",
            stats.total_keys, stats.active_chats, stats.total_messages
        );
        print_summaries(&board.dashboard.summaries().await?);
        return Ok(());
    }

    let poller = Poller::new(board.dashboard.clone());
    poller.start((), interval(board, interval_ms), |event| match event {
        PollEvent::Update { all, .. } => print_summaries(&all),
        PollEvent::Failed(e) => eprintln!("{}", notification_line(&e)),
    });
    wait_for_ctrl_c().await?;
    poller.stop_all();
    Ok(())
}

/// Explicit `--chat`, else the chat selected with `chat open`. Deleted
/// chats are refused.
async fn resolve_chat(board: &Board, explicit: Option<u64>) -> Result<u64, CliError> {
    let id = explicit.or_else(|| board.session.current_chat()).ok_or(CliError::NoChatSelected)?;
    board.registry.get(id).await?;
    Ok(id)
}

fn interval(board: &Board, interval_ms: Option<u64>) -> Duration {
    interval_ms.map_or(board.settings.poll_interval, Duration::from_millis)
}

async fn wait_for_ctrl_c() -> Result<(), CliError> {
    tokio::signal::ctrl_c().await.map_err(|e| CliError::Signal(e.to_string()))
}

fn print_message(message: &Message) {
    println!("[{}] {}: {}", timestamp(message.created_at), message.author, message.body);
}

fn print_summaries(summaries: &[ChatSummary]) {
    for summary in summaries {
        let last = summary
            .last_message
            .as_ref()
            .map_or_else(|| "no messages".to_string(), |m| format!("{}: {}", m.author, m.body));
        println!("#{}\t{}\t{} messages\t{last}", summary.record.id, summary.record.name, summary.message_count);
    }
}

fn timestamp(at: time::OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
