//! # docsync CLI
//!
//! The `docsync` binary is the reference consumer of the coordinator
//! library. It keeps a local SQLite projection of the document store,
//! uploads files into conversations and folders, reconciles against the
//! server's metadata index, and drives report generation.
//!
//! ## Usage
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync init` | Create the local SQLite state and run migrations |
//! | `docsync login --token <t>` | Store the bearer token |
//! | `docsync upload <path> --chat <id>` | Upload a file into a conversation |
//! | `docsync list [--chat <id>]` | Show locally-known documents |
//! | `docsync load <chat>` | Reconcile a conversation against the server |
//! | `docsync remove <document-id>` | Drop a document and revoke its preview |
//! | `docsync annotate <file-id>` | Update a file's server-side metadata |
//! | `docsync folder <action>` | Manage folders (create, list, show, update, delete, upload) |
//! | `docsync report <action>` | Drive the report pipeline (generate, list, delete) |
//! | `docsync health` | Probe the backend's processing service |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docsync::config::{self, Config};
use docsync::folders::{self, FolderCoordinator, MemberResolution};
use docsync::models::{ChatMessage, Document, DocumentSource, DocumentStatus, JobStatus};
use docsync::progress::ProgressMode;
use docsync::report::{AgentCompletion, CancelHandle, ReportCoordinator, ReportRequest};
use docsync::store::DocumentStore;
use docsync::transport::{FilePayload, MetadataUpdate, Transport};
use docsync::{classify, db, migrate, persist};

/// docsync CLI: client-side document ingestion and synchronization for
/// analytics chat workspaces.
#[derive(Parser)]
#[command(
    name = "docsync",
    about = "docsync — document ingestion and synchronization for analytics chat workspaces",
    version,
    long_about = "docsync uploads files to the analytics backend (proxy first, presigned \
    direct second), keeps a per-conversation document view reconciled against the server's \
    metadata index, manages folders, and drives asynchronous Excel report generation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docsync.toml`. When the file does not exist,
    /// built-in defaults are used (`NEXT_PUBLIC_API_URL` still overrides
    /// the API base).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    /// Progress output: `off`, `human`, or `json`. Defaults to `human`
    /// when stderr is a TTY.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local database schema.
    ///
    /// Creates the SQLite file and the kv table holding the persisted
    /// document projection and the access token. Idempotent.
    Init,

    /// Store the bearer token used for authenticated calls.
    Login {
        /// The access token issued by the auth service.
        #[arg(long)]
        token: String,
    },

    /// Forget the stored bearer token.
    Logout,

    /// Upload a file into a conversation.
    Upload {
        /// Path of the local file to upload.
        path: PathBuf,

        /// Conversation the document belongs to.
        #[arg(long)]
        chat: String,

        /// Originating surface: `chat`, `sidebar`, or `knowledge-base`.
        #[arg(long, default_value = "chat")]
        source: String,
    },

    /// Show locally-known documents.
    List {
        /// Restrict to one conversation.
        #[arg(long)]
        chat: Option<String>,
    },

    /// Reconcile a conversation against the server and show its documents.
    Load {
        /// Conversation identifier.
        chat: String,
    },

    /// Remove a document. Deletes the server-side file too when the
    /// document was committed remotely and a token is stored.
    Remove {
        /// Document identifier.
        id: String,
    },

    /// Update a file's server-side metadata.
    Annotate {
        /// Server file identifier.
        id: String,
        /// New display name.
        #[arg(long)]
        name: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// Replacement tag set.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Manage folders.
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Generate and manage reports.
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Probe the backend's file-processing service.
    Health,
}

/// Folder management subcommands.
#[derive(Subcommand)]
enum FolderAction {
    /// Create a folder.
    Create {
        /// Folder name.
        name: String,
        /// Folder type tag.
        #[arg(long, default_value = "documents")]
        r#type: String,
        /// Initial member document ids.
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// List folders.
    List,
    /// Show a folder and resolve its members.
    Show {
        /// Folder identifier.
        id: String,
    },
    /// Replace a folder's name and member list.
    Update {
        /// Folder identifier.
        id: String,
        /// New name.
        #[arg(long)]
        name: String,
        /// Replacement member document ids (full replacement).
        #[arg(long = "member")]
        members: Vec<String>,
        /// Folder type tag.
        #[arg(long)]
        r#type: Option<String>,
    },
    /// Delete a folder. Referenced documents are kept.
    Delete {
        /// Folder identifier.
        id: String,
    },
    /// Upload the files under a local directory into a folder.
    Upload {
        /// Folder identifier.
        id: String,
        /// Local directory to scan.
        dir: PathBuf,
        /// Include globs (all files when omitted).
        #[arg(long = "include")]
        include: Vec<String>,
    },
}

/// Report subcommands.
#[derive(Subcommand)]
enum ReportAction {
    /// Synthesize a configuration and render an Excel report.
    Generate {
        /// Conversation whose documents feed the report.
        #[arg(long)]
        chat: String,
        /// Optional user directive for the configuration model.
        #[arg(long)]
        directive: Option<String>,
        /// Artifact filename (`.xlsx` appended when missing).
        #[arg(long)]
        filename: Option<String>,
    },
    /// List rendered report artifacts.
    List,
    /// Delete a rendered report artifact.
    Delete {
        /// Artifact filename.
        filename: String,
    },
}

fn parse_source(source: &str) -> Result<DocumentSource> {
    match source {
        "chat" => Ok(DocumentSource::Chat),
        "sidebar" => Ok(DocumentSource::Sidebar),
        "folder" => Ok(DocumentSource::Folder),
        "knowledge-base" => Ok(DocumentSource::KnowledgeBase),
        other => bail!("unknown source '{other}' (expected chat, sidebar, folder, knowledge-base)"),
    }
}

fn parse_progress(mode: Option<&str>) -> Result<ProgressMode> {
    match mode {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => bail!("unknown progress mode '{other}' (expected off, human, json)"),
    }
}

fn load_config_or_default(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        eprintln!(
            "Warning: config file {} not found, using defaults",
            path.display()
        );
        Ok(Config::minimal())
    }
}

fn read_file(path: &PathBuf) -> Result<FilePayload> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("not a file: {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(FilePayload {
        mime: classify::mime_for_name(&name).to_string(),
        name,
        bytes,
    })
}

fn print_document(doc: &Document) {
    println!("{}  {:?}  {}  ({} bytes)", doc.id, doc.status, doc.name, doc.size);
    if doc.stored_in_database {
        if let Some(url) = doc.url() {
            println!("    url: {}", url);
        }
    }
    if let Some(ref error) = doc.error {
        println!("    error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config_or_default(&cli.config)?;
    let progress = parse_progress(cli.progress.as_deref())?.reporter();

    let transport = Transport::new(&cfg.api, cfg.report.ai_api_url.clone())?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Local state initialized successfully.");
        }

        Commands::Login { token } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            persist::save_token(&pool, &token).await?;
            pool.close().await;
            println!("Token stored.");
        }

        Commands::Logout => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            persist::clear_token(&pool).await?;
            pool.close().await;
            println!("Token cleared.");
        }

        Commands::Upload { path, chat, source } => {
            let source = parse_source(&source)?;
            let file = read_file(&path)?;

            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let token = persist::load_token(&pool).await?;
            if token.is_none() {
                eprintln!("Warning: no token stored; upload stays local (run `docsync login`)");
            }

            let store = DocumentStore::new(&cfg, transport, Some(pool.clone())).await?;
            let doc = store
                .upload(file, &chat, source, token.as_deref())
                .await;
            store.flush().await?;
            pool.close().await;

            print_document(&doc);
            if doc.status == DocumentStatus::Failed {
                std::process::exit(1);
            }
        }

        Commands::List { chat } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let documents = persist::load_documents(&pool).await?;
            pool.close().await;

            let filtered: Vec<&Document> = documents
                .iter()
                .filter(|d| chat.as_deref().map(|c| d.conversation_id == c).unwrap_or(true))
                .collect();

            println!("documents: {}", filtered.len());
            for doc in filtered {
                print_document(doc);
            }
        }

        Commands::Load { chat } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let token = persist::load_token(&pool)
                .await?
                .context("no token stored; run `docsync login` first")?;

            let store = DocumentStore::new(&cfg, transport, Some(pool.clone())).await?;
            store.load_conversation(&chat, &token).await;
            let view = store.current_view();
            store.flush().await?;
            pool.close().await;

            println!("conversation: {}", chat);
            println!("documents: {}", view.documents.len());
            for doc in &view.documents {
                print_document(doc);
            }
        }

        Commands::Remove { id } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let token = persist::load_token(&pool).await?;
            let store = DocumentStore::new(&cfg, transport.clone(), Some(pool.clone())).await?;

            if let (Some(doc), Some(token)) = (store.get(&id), token.as_deref()) {
                if let Some(remote_id) = doc.metadata.as_ref().map(|m| m.id.clone()) {
                    if let Err(e) = transport.delete_file(&remote_id, token).await {
                        eprintln!("Warning: server-side delete failed: {e}");
                    }
                }
            }

            let removed = store.remove(&id);
            store.flush().await?;
            pool.close().await;

            if removed {
                println!("removed {}", id);
            } else {
                eprintln!("Error: no document with id {}", id);
                std::process::exit(1);
            }
        }

        Commands::Annotate {
            id,
            name,
            description,
            tags,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let token = persist::load_token(&pool)
                .await?
                .context("no token stored; run `docsync login` first")?;
            pool.close().await;

            let update = MetadataUpdate {
                filename: name,
                description,
                tags: if tags.is_empty() { None } else { Some(tags) },
            };
            let metadata = transport.update_metadata(&id, &update, &token).await?;
            println!("{}  {}", metadata.id, metadata.filename);
            if !metadata.tags.is_empty() {
                println!("tags: {}", metadata.tags.join(", "));
            }
        }

        Commands::Folder { action } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let token = persist::load_token(&pool)
                .await?
                .context("no token stored; run `docsync login` first")?;
            pool.close().await;

            let coordinator = FolderCoordinator::new(transport, cfg.uploads.clone());

            match action {
                FolderAction::Create {
                    name,
                    r#type,
                    members,
                } => {
                    let folder = coordinator
                        .create_folder(&name, Some(&r#type), members, &token)
                        .await?;
                    println!("created folder {} ({})", folder.name, folder.id);
                    println!("members: {}", folder.member_count());
                }
                FolderAction::List => {
                    let folders = coordinator.get_folders(&token).await?;
                    println!("folders: {}", folders.len());
                    for folder in folders {
                        println!(
                            "{}  {}  [{}]  {} members",
                            folder.id,
                            folder.name,
                            folder.folder_type,
                            folder.member_count()
                        );
                    }
                }
                FolderAction::Show { id } => {
                    let folders = coordinator.get_folders(&token).await?;
                    let folder = folders
                        .into_iter()
                        .find(|f| f.id == id)
                        .with_context(|| format!("no folder with id {id}"))?;
                    println!("folder: {} ({})", folder.name, folder.id);
                    for resolution in coordinator.resolve_members(&folder, &token).await {
                        match resolution {
                            MemberResolution::Resolved(meta) => {
                                println!("  {}  {}", meta.id, meta.filename)
                            }
                            MemberResolution::Unresolved(id) => {
                                println!("  {}  (unresolved)", id)
                            }
                        }
                    }
                }
                FolderAction::Update {
                    id,
                    name,
                    members,
                    r#type,
                } => {
                    let folder = coordinator
                        .update_folder(&id, &name, r#type.as_deref(), members, &token)
                        .await?;
                    println!("updated folder {} ({})", folder.name, folder.id);
                    println!("members: {}", folder.member_count());
                }
                FolderAction::Delete { id } => {
                    coordinator.delete_folder(&id, &token).await?;
                    println!("deleted folder {}", id);
                }
                FolderAction::Upload { id, dir, include } => {
                    let files = folders::collect_local_files(&dir, &include)?;
                    if files.is_empty() {
                        bail!("no files matched under {}", dir.display());
                    }
                    let summary = coordinator
                        .upload_files(files, &id, &token, progress.as_ref())
                        .await;
                    println!("uploaded: {}", summary.succeeded.len());
                    println!("failed: {}", summary.failed.len());
                    for (name, error) in &summary.failed {
                        eprintln!("  {}: {}", name, error);
                    }
                    if !summary.all_succeeded() {
                        std::process::exit(1);
                    }
                }
            }
        }

        Commands::Report { action } => match action {
            ReportAction::Generate {
                chat,
                directive,
                filename,
            } => {
                let pool = db::connect(&cfg.db.path).await?;
                migrate::run_migrations(&pool).await?;
                let token = persist::load_token(&pool)
                    .await?
                    .context("no token stored; run `docsync login` first")?;

                let store = DocumentStore::new(&cfg, transport.clone(), Some(pool.clone())).await?;
                store.load_conversation(&chat, &token).await;
                let documents = store.documents_for(&chat);
                store.flush().await?;
                pool.close().await;

                let coordinator = ReportCoordinator::new(transport.clone(), cfg.report.clone());
                let completion = AgentCompletion::new(transport, token.clone());

                let cancel = CancelHandle::new();
                let ctrl_c_cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        ctrl_c_cancel.cancel();
                    }
                });

                let transcript: Vec<ChatMessage> = Vec::new();
                let job = coordinator
                    .generate(
                        &completion,
                        ReportRequest {
                            transcript: &transcript,
                            documents: &documents,
                            directive: directive.as_deref(),
                            filename: filename.as_deref(),
                        },
                        &cancel,
                        progress.as_ref(),
                    )
                    .await;

                println!("job: {}", job.job_id);
                println!("status: {:?}", job.status);
                println!("progress: {}%", job.progress_percent);
                for warning in &job.warnings {
                    println!("warning: {}", warning);
                }
                if let Some(url) = &job.download_url {
                    println!("download: {}", url);
                }
                if let Some(error) = &job.error_message {
                    eprintln!("Error: {}", error);
                }
                if job.status != JobStatus::Completed {
                    std::process::exit(1);
                }
            }
            ReportAction::List => {
                let artifacts = transport.list_reports().await?;
                println!("reports: {}", artifacts.len());
                for artifact in artifacts {
                    println!("{}  ({} bytes)", artifact.filename, artifact.size);
                }
            }
            ReportAction::Delete { filename } => {
                transport.delete_report(&filename).await?;
                println!("deleted {}", filename);
            }
        },

        Commands::Health => match transport.health().await {
            Ok(()) => println!("ok"),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
