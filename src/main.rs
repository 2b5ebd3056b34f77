//! # ragchat CLI
//!
//! The `ragchat` binary manages the document store, runs chats from the
//! terminal, and starts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and run schema migrations |
//! | `ragchat ingest <path>` | Store a text or PDF file, or a directory of them, as documents |
//! | `ragchat documents` | List documents and whether they are indexed |
//! | `ragchat chat new` | Create a chat |
//! | `ragchat chat list` | List chats with their latest message |
//! | `ragchat chat show <id>` | Print a chat and its messages |
//! | `ragchat ask <chat-id> "<message>"` | Answer a message in a chat |
//! | `ragchat serve` | Start the JSON HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragchat::{commands, config, logging, migrate, server};

/// ragchat: chat with your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "Retrieval-augmented chat over your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Store a text or PDF file as a document and index it. Given a
    /// directory, every matching file below it is ingested.
    ///
    /// If embedding fails the document is kept and indexed on a later
    /// sync, but the command exits non-zero.
    Ingest {
        /// Path to a file or directory.
        path: PathBuf,

        /// Document title. Defaults to the file name without extension.
        /// Only valid for a single file.
        #[arg(long)]
        title: Option<String>,

        /// Glob for directory ingest, relative to the directory. May be
        /// repeated. Defaults to `**/*.pdf`, `**/*.txt` and `**/*.md`.
        #[arg(long = "glob")]
        globs: Vec<String>,
    },

    /// List documents.
    Documents,

    /// Manage chats.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Send a message to a chat and print the answer.
    Ask {
        /// Chat ID.
        chat_id: String,
        /// The message text.
        message: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ChatAction {
    /// Create a chat. Without `--title` it is named `New Chat {n}`.
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// List chats, most recently active first.
    List,
    /// Show a chat and all of its messages.
    Show {
        /// Chat ID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, title, globs } => {
            commands::run_ingest(&cfg, &path, title, &globs).await?;
        }
        Commands::Documents => {
            commands::run_documents(&cfg).await?;
        }
        Commands::Chat { action } => match action {
            ChatAction::New { title } => commands::run_chat_new(&cfg, title).await?,
            ChatAction::List => commands::run_chat_list(&cfg).await?,
            ChatAction::Show { id } => commands::run_chat_show(&cfg, &id).await?,
        },
        Commands::Ask { chat_id, message } => {
            commands::run_ask(&cfg, &chat_id, &message).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
