//! Octrafic - chat with an LLM agent to explore and test your HTTP API.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

mod render;
mod repl;

use clap::{Args, Parser, Subcommand};
use octrafic::collab::{
    EndpointRepository, ExporterRegistry, HttpTestExecutor, JsonEndpointRepository,
    MarkdownReportGenerator,
};
use octrafic::config::{Config, ProjectConfig, ProjectPaths};
use octrafic::conversation::check_id;
use octrafic::prompt::system_prompt;
use octrafic::{
    AutoApproveHandler, Collaborators, ConfirmationHandler, ConversationStore, Controller, Error,
    GateMode, OpenAiCompatible, Result, SessionObserver, SharedConversationStore, SharedModel,
    SqliteConversationStore, TestPlanner, TurnEnd,
};
use render::TerminalObserver;
use repl::{Console, StdinConfirmations, StdinPlanSelector};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Octrafic - chat with an LLM agent to explore and test your HTTP API
#[derive(Parser)]
#[command(name = "octrafic")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "OCTRAFIC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Project id
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Base URL of the API (a temporary project when no --project is given)
    #[arg(short, long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat(ChatArgs),

    /// Run a single prompt without interaction
    Test(TestArgs),

    /// Manage stored conversations
    Conversations(ConversationsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the chat command
#[derive(Args)]
struct ChatArgs {
    /// Id for the new conversation
    #[arg(long, conflicts_with = "resume")]
    conversation: Option<String>,

    /// Continue a stored conversation
    #[arg(long)]
    resume: Option<String>,

    /// Do not persist this session
    #[arg(long)]
    temporary: bool,

    /// Run every tool call without asking
    #[arg(long)]
    yolo: bool,
}

/// Arguments for the test command
#[derive(Args)]
struct TestArgs {
    /// What to ask the agent
    #[arg(long)]
    prompt: String,

    /// Approve every call and select every planned test
    #[arg(long)]
    auto: bool,
}

/// Arguments for the conversations command
#[derive(Args)]
struct ConversationsArgs {
    #[command(subcommand)]
    command: ConversationCommands,
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// List conversations, most recent first
    List,
    /// Delete a conversation
    Delete {
        /// Conversation id
        id: String,
    },
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Write a configuration file with defaults and environment overrides
    Init,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging on stderr with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("octrafic={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point. `Ok(false)` means a test failed or the model stream broke.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    match &cli.command {
        Commands::Chat(args) => cmd_chat(&cli, args, &config_path).await,
        Commands::Test(args) => cmd_test(&cli, args, &config_path).await,
        Commands::Conversations(args) => cmd_conversations(&cli, args, &config_path).await,
        Commands::Config(args) => cmd_config(args, &config_path),
    }
}

/// Start an interactive chat.
async fn cmd_chat(cli: &Cli, args: &ChatArgs, config_path: &Path) -> Result<bool> {
    let config = load_config(config_path)?;
    let data_dir = config.data_dir()?;
    let project = resolve_project(cli, &data_dir, args.temporary)?;

    let console = Console::new();
    let observer = Arc::new(TerminalObserver::default());
    let mode = if args.yolo {
        GateMode::AutoExecute
    } else {
        GateMode::Interactive
    };
    let conversation_id = args
        .conversation
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    check_id(&conversation_id)?;

    let mut controller = build_controller(&config, &data_dir, project, mode, &console, &observer)
        .await?
        .persist(store(&data_dir), conversation_id)
        .build();
    if let Some(id) = &args.resume {
        controller.resume(id).await?;
    }

    let quit = repl::spawn_interrupts(controller.cancel_switch(), Arc::clone(&observer));
    Ok(repl::run(&mut controller, &console, &quit).await)
}

/// Run one prompt headless and report failures through the exit code.
async fn cmd_test(cli: &Cli, args: &TestArgs, config_path: &Path) -> Result<bool> {
    let config = load_config(config_path)?;
    let data_dir = config.data_dir()?;
    let project = resolve_project(cli, &data_dir, false)?;

    let console = Console::new();
    let observer = Arc::new(TerminalObserver::default());
    let mode = if args.auto {
        GateMode::AutoExecute
    } else {
        GateMode::Interactive
    };
    let mut controller = build_controller(&config, &data_dir, project, mode, &console, &observer)
        .await?
        .persist(store(&data_dir), uuid::Uuid::new_v4().to_string())
        .build();
    let _quit = repl::spawn_interrupts(controller.cancel_switch(), Arc::clone(&observer));

    println!("> {}", args.prompt);
    let report = controller.submit(&args.prompt).await;
    if report.end == TurnEnd::Cancelled {
        println!("Cancelled");
    }
    if !report.tests.is_empty() {
        println!(
            "\n{} tests executed, {} failed",
            report.tests.len(),
            report.tests_failed()
        );
    }
    Ok(report.is_success())
}

/// List or delete stored conversations.
async fn cmd_conversations(cli: &Cli, args: &ConversationsArgs, config_path: &Path) -> Result<bool> {
    let config = load_config(config_path)?;
    let data_dir = config.data_dir()?;
    let project_id = cli
        .project
        .as_deref()
        .ok_or_else(|| Error::session("conversations belong to a project; pass --project <id>"))?;
    let store = SqliteConversationStore::new(&data_dir);

    match &args.command {
        ConversationCommands::List => {
            let conversations = store.list_conversations(project_id).await?;
            if conversations.is_empty() {
                println!("No conversations.");
            }
            for conversation in conversations {
                println!(
                    "{}  {}  {}",
                    conversation.id,
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                    conversation.title
                );
            }
        }
        ConversationCommands::Delete { id } => {
            store.delete_conversation(project_id, id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(true)
}

/// Configuration management.
fn cmd_config(args: &ConfigArgs, config_path: &Path) -> Result<bool> {
    match args.command {
        ConfigCommands::Path => println!("{}", config_path.display()),
        ConfigCommands::Show => {
            let mut config = Config::load(Some(config_path))?;
            if !config.api_key.is_empty() {
                config.api_key = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Init => {
            if config_path.exists() {
                println!("Configuration already exists at: {}", config_path.display());
                return Ok(true);
            }
            let mut config = Config::default();
            config.apply_env();
            config.save_to(config_path)?;
            println!("Configuration created: {}", config_path.display());
        }
    }
    Ok(true)
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(Some(path))?;
    config.validate()?;
    Ok(config)
}

/// `--project` loads a stored project; `--url` alone makes a temporary one.
fn resolve_project(cli: &Cli, data_dir: &Path, temporary: bool) -> Result<ProjectConfig> {
    let mut project = match (&cli.project, &cli.url) {
        (Some(id), url) => {
            let mut project = ProjectConfig::load(data_dir, id)?;
            if let Some(url) = url {
                project.base_url.clone_from(url);
            }
            project
        }
        (None, Some(url)) => ProjectConfig::temporary(url.clone()),
        (None, None) => {
            return Err(Error::session("pass --project <id> or --url <base url>"));
        }
    };
    project.temporary |= temporary;
    Ok(project)
}

fn store(data_dir: &Path) -> SharedConversationStore {
    Arc::new(SqliteConversationStore::new(data_dir))
}

async fn build_controller(
    config: &Config,
    data_dir: &Path,
    project: ProjectConfig,
    mode: GateMode,
    console: &Console,
    observer: &Arc<TerminalObserver>,
) -> Result<octrafic::ControllerBuilder> {
    let mut client = OpenAiCompatible::builder()
        .provider(config.provider.clone())
        .api_key(config.api_key.clone())
        .model(config.model.clone())
        .timeout_secs(config.request_timeout_secs);
    if !config.base_url.is_empty() {
        client = client.base_url(config.base_url.clone());
    }
    let model: SharedModel = Arc::new(client.build()?);

    let endpoints = Arc::new(JsonEndpointRepository::new(data_dir));
    let known = endpoints.load_endpoints(&project.id).await.unwrap_or_else(|e| {
        tracing::warn!(project = %project.id, error = %e, "endpoints unavailable");
        Vec::new()
    });
    let collab = Collaborators {
        executor: Arc::new(HttpTestExecutor::new(
            project.base_url.clone(),
            project.auth.clone(),
            config.request_timeout_secs,
        )?),
        reports: Arc::new(MarkdownReportGenerator::new(
            ProjectPaths::new(data_dir, &project.id).reports_dir(),
        )),
        exporters: ExporterRegistry::default(),
        endpoints,
        planner: TestPlanner::new(Arc::clone(&model)),
    };

    let confirmations: Arc<dyn ConfirmationHandler> = match mode {
        GateMode::AutoExecute => Arc::new(AutoApproveHandler),
        GateMode::Interactive => Arc::new(StdinConfirmations::new(console.clone())),
    };
    let observer: Arc<dyn SessionObserver> = Arc::clone(observer) as Arc<dyn SessionObserver>;

    let working_dir = std::env::current_dir()?;
    Ok(Controller::builder(model, collab)
        .system_prompt(system_prompt(&project.base_url, &known))
        .mode(mode)
        .confirmations(confirmations)
        .plan_selector(Arc::new(StdinPlanSelector::new(console.clone())))
        .observer(observer)
        .project(project)
        .working_dir(working_dir))
}
