//! quickops - code anchors and a local mock server
//!
//! `quickops serve` runs the daemon for a workspace: proxy listeners with
//! mock rules, anchor reconciliation on save, and the control API. The
//! other subcommands work on the workspace files directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr, bail};
use owo_colors::OwoColorize;
use quickops::anchors::AnchorService;
use quickops::config::SettingsStore;
use quickops::daemon::{self, ServeOptions};
use quickops::notify::NotificationHub;
use quickops::output::{self, OutputFormat};
use quickops::persist::FsPersistence;
use quickops::proxy;
use quickops_core::{Direction, NewAnchor, normalize_path};

#[derive(Parser, Debug)]
#[command(name = "quickops")]
#[command(about = "Code anchors with drift reconciliation, plus a local mock server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root (default: nearest directory with .quickops or .git)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Output format: text, json
    #[arg(short, long, global = true, default_value = "text")]
    format: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start proxy listeners, the file watcher and the control API
    Serve {
        /// Control API port
        #[arg(long, env = "QUICKOPS_CONTROL_PORT", default_value_t = quickops::control::DEFAULT_PORT)]
        control_port: u16,

        /// Run without the control API
        #[arg(long)]
        no_control: bool,
    },

    /// Manage code anchors
    #[command(subcommand)]
    Anchors(AnchorsCommand),

    /// Inspect mock rules
    #[command(subcommand)]
    Mock(MockCommand),
}

#[derive(Subcommand, Debug)]
enum AnchorsCommand {
    /// List anchors
    #[command(alias = "ls")]
    List {
        /// Only anchors of this file
        #[arg(long)]
        file: Option<String>,
    },

    /// Add an anchor at FILE:LINE
    Add {
        file: String,
        line: u32,
        #[arg(short, long)]
        group: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove an anchor and its children
    #[command(alias = "rm")]
    Remove { id: String },

    /// Move an anchor within its siblings
    Move { id: String, direction: MoveDirection },

    /// Re-align the anchors of FILE with its current contents
    Reconcile { file: String },

    /// List anchor groups
    Groups,
}

#[derive(Subcommand, Debug)]
enum MockCommand {
    /// Show which rule would answer a request
    Check {
        method: String,
        url: String,
        /// Proxy id (default: first enabled proxy)
        #[arg(long)]
        proxy: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MoveDirection {
    Up,
    Down,
}

impl From<MoveDirection> for Direction {
    fn from(d: MoveDirection) -> Self {
        match d {
            MoveDirection::Up => Direction::Up,
            MoveDirection::Down => Direction::Down,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(format) = OutputFormat::from_str(&cli.format) else {
        bail!("Unknown output format: {}", cli.format);
    };
    let root = match cli.root {
        Some(root) => root,
        None => quickops::find_project_root()?,
    };

    match cli.command {
        Commands::Serve {
            control_port,
            no_control,
        } => {
            let options = ServeOptions {
                control_port: (!no_control).then_some(control_port),
            };
            daemon::run(root, options).await
        }
        Commands::Anchors(command) => run_anchors(&root, command, format).await,
        Commands::Mock(MockCommand::Check { method, url, proxy }) => {
            run_mock_check(&root, &method, &url, proxy.as_deref()).await
        }
    }
}

async fn open_anchors(root: &Path) -> AnchorService {
    AnchorService::open(
        root.to_path_buf(),
        Arc::new(FsPersistence),
        Arc::new(NotificationHub::new()),
    )
    .await
}

async fn run_anchors(root: &Path, command: AnchorsCommand, format: OutputFormat) -> Result<()> {
    let anchors = open_anchors(root).await;

    match command {
        AnchorsCommand::List { file } => {
            let list = anchors.anchors(file.as_deref());
            print!("{}", output::render_anchors(&list, format));
            return Ok(());
        }
        AnchorsCommand::Groups => {
            print!("{}", output::render_groups(&anchors.groups(), format));
            return Ok(());
        }
        AnchorsCommand::Add {
            file,
            line,
            group,
            description,
        } => {
            let rel = normalize_path(&file);
            let full = root.join(&rel);
            let text = tokio::fs::read_to_string(&full)
                .await
                .wrap_err_with(|| format!("Failed to read {}", full.display()))?;
            let Some(content) = line
                .checked_sub(1)
                .and_then(|i| text.lines().nth(i as usize))
            else {
                bail!("{} has no line {}", rel, line);
            };
            let mut new = NewAnchor::new(rel, line, content);
            if let Some(group) = group {
                new = new.group(group);
            }
            if let Some(description) = description {
                new = new.description(description);
            }
            let record = anchors.add_anchor(new);
            println!(
                "{} Added {} at {}:{}",
                "+".green().bold(),
                record.id.cyan(),
                record.file_path,
                record.line
            );
        }
        AnchorsCommand::Remove { id } => match anchors.remove_anchor(&id) {
            Some(record) => println!("{} Removed {}", "-".yellow().bold(), record.id),
            None => bail!("No anchor with id {}", id),
        },
        AnchorsCommand::Move { id, direction } => {
            if !anchors.move_anchor(&id, direction.into()) {
                println!("{} {} did not move", "!".yellow().bold(), id);
                return Ok(());
            }
            println!("{} Moved {}", "->".blue().bold(), id);
        }
        AnchorsCommand::Reconcile { file } => {
            let changes = anchors.reconcile_file(&file).await?;
            if changes.is_empty() {
                println!("{} Anchors of {} are up to date", "ok".green(), file);
            }
            for change in &changes {
                println!(
                    "{} {} {} -> {}{}",
                    "->".blue().bold(),
                    change.id.dimmed(),
                    change.old_line,
                    change.new_line,
                    if change.content_changed {
                        " (content refreshed)"
                    } else {
                        ""
                    }
                );
            }
        }
    }

    if !anchors.flush().await {
        bail!("Failed to save anchors");
    }
    Ok(())
}

async fn run_mock_check(root: &Path, method: &str, url: &str, proxy: Option<&str>) -> Result<()> {
    let store = SettingsStore::load(root, Arc::new(FsPersistence)).await;
    let settings = store.snapshot();

    let proxy_id = match proxy {
        Some(id) => id.to_string(),
        None => match settings
            .proxy
            .iter()
            .find(|p| p.enabled)
            .or_else(|| settings.proxy.first())
        {
            Some(p) => p.id.clone(),
            None => bail!("No proxies configured in {}", store.path().display()),
        },
    };
    if settings.proxy(&proxy_id).is_none() {
        bail!("Unknown proxy: {}", proxy_id);
    }

    let route = proxy::route(&settings, &proxy_id, method, url);
    print!("{}", output::render_route(method, url, &route));
    Ok(())
}
