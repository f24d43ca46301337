use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{
        DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetwatch::app::{ToastLevel, UiApp};
use fleetwatch::backend::Backend;
use fleetwatch::client::{FleetApi, HttpFleetClient};
use fleetwatch::event::{Event, EventHandler};
use fleetwatch::models::{ModelConfig, ReviewKind, ReviewRequest};
use fleetwatch::settings::{self, Settings};
use fleetwatch::{telemetry, ui};

const EVENT_TICK_RATE: Duration = Duration::from_millis(50);

type Term = Terminal<CrosstermBackend<io::Stdout>>;

#[derive(Parser)]
#[command(
    name = "fleetwatch",
    version,
    about = "Terminal dashboard for a fleet of AI coding agents"
)]
struct Cli {
    /// Backend base URL (overrides config and FLEETWATCH_SERVER)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List agents and their status
    Ls,
    /// Delete an agent
    Delete {
        /// Agent id
        id: String,
    },
    /// Send review feedback to an agent
    Review {
        /// Agent id
        id: String,
        #[arg(long)]
        feedback: String,
        /// comment, request_changes or approve
        #[arg(long, default_value = "comment")]
        kind: ReviewKind,
    },
    /// Show or change the model configuration
    Models {
        #[command(subcommand)]
        action: Option<ModelsCommand>,
    },
    /// List open GitHub issues that can be imported as tasks
    Issues { repo_url: String },
    /// Write the default config file if none exists
    InitConfig,
}

#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// Save a new model configuration
    Set {
        #[arg(long)]
        orchestrator: String,
        #[arg(long)]
        aider: String,
        #[arg(long)]
        agent: String,
        /// Extra text appended to every aider prompt
        #[arg(long)]
        suffix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_dir = settings::default_base_dir();
    let mut config = settings::load_settings(&base_dir).await;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(server) = &cli.server {
        config.server_url = server.trim_end_matches('/').to_string();
    }

    match cli.command {
        None => run_tui(config, &base_dir).await,
        Some(command) => {
            telemetry::init_stderr_logging(&config.log_level);
            run_command(command, &config, &base_dir).await
        }
    }
}

fn connect(config: &Settings) -> Result<HttpFleetClient> {
    HttpFleetClient::new(&config.server_url, config.request_timeout())
        .with_context(|| format!("Invalid server url: {}", config.server_url))
}

async fn run_command(command: Commands, config: &Settings, base_dir: &Path) -> Result<()> {
    match command {
        Commands::Ls => cmd_ls(&connect(config)?).await,
        Commands::Delete { id } => {
            connect(config)?
                .delete_agent(&id)
                .await
                .with_context(|| format!("Failed to delete agent {id}"))?;
            println!("Deleted agent: {id}");
            Ok(())
        }
        Commands::Review { id, feedback, kind } => {
            let feedback = feedback.trim().to_string();
            if feedback.is_empty() {
                anyhow::bail!("Feedback cannot be empty.");
            }
            connect(config)?
                .submit_review(&id, &ReviewRequest { feedback, kind })
                .await
                .with_context(|| format!("Failed to submit review for {id}"))?;
            println!("Review ({kind}) sent to {id}");
            Ok(())
        }
        Commands::Models { action: None } => {
            let models = connect(config)?
                .fetch_model_config()
                .await
                .context("Failed to load model configuration")?;
            print_models(&models);
            Ok(())
        }
        Commands::Models {
            action:
                Some(ModelsCommand::Set {
                    orchestrator,
                    aider,
                    agent,
                    suffix,
                }),
        } => {
            let models = ModelConfig {
                orchestrator_model: orchestrator,
                aider_model: aider,
                agent_model: agent,
                aider_prompt_suffix: suffix.filter(|s| !s.trim().is_empty()),
            };
            let saved = connect(config)?
                .save_model_config(&models)
                .await
                .context("Failed to save model configuration")?;
            println!("Saved model configuration.");
            print_models(&saved);
            Ok(())
        }
        Commands::Issues { repo_url } => {
            let issues = connect(config)?
                .fetch_github_issues(&repo_url)
                .await
                .with_context(|| format!("Failed to fetch issues for {repo_url}"))?;
            if issues.is_empty() {
                println!("No open issues.");
            }
            for issue in &issues {
                match issue.number {
                    Some(n) => println!("#{n} {}", issue.title),
                    None => println!("{}", issue.title),
                }
            }
            Ok(())
        }
        Commands::InitConfig => {
            let path = settings::settings_path(base_dir);
            if path.exists() {
                println!("Config already exists: {}", path.display());
                return Ok(());
            }
            settings::save_settings(base_dir, &Settings::default())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default config: {}", path.display());
            Ok(())
        }
    }
}

async fn cmd_ls(client: &HttpFleetClient) -> Result<()> {
    let doc = client
        .fetch_tasks()
        .await
        .with_context(|| format!("Failed to fetch status from {}", client.base_url()))?;
    for id in &doc.skipped {
        tracing::warn!(agent_id = %id, "skipping malformed agent entry");
    }
    if doc.agents.is_empty() {
        println!("No agents.");
    } else {
        for (id, agent) in &doc.agents {
            println!("{id} [{}] {}", agent.status, agent.task);
        }
    }
    Ok(())
}

fn print_models(models: &ModelConfig) {
    println!("orchestrator: {}", models.orchestrator_model);
    println!("aider:        {}", models.aider_model);
    println!("agent:        {}", models.agent_model);
    if let Some(suffix) = &models.aider_prompt_suffix {
        println!("suffix:       {suffix}");
    }
}

/// Copy to the system clipboard, reporting the outcome as a toast.
fn copy_to_clipboard(clipboard: &mut Option<arboard::Clipboard>, app: &mut UiApp, text: String) {
    let now = Instant::now();
    let result = match clipboard.as_mut() {
        Some(clipboard) => clipboard.set_text(text).map_err(|e| e.to_string()),
        None => Err("no clipboard available".to_string()),
    };
    match result {
        Ok(()) => app.notify(ToastLevel::Success, "Copied output".to_string(), now),
        Err(e) => {
            tracing::warn!(error = %e, "clipboard write failed");
            app.notify(ToastLevel::Error, format!("Copy failed: {e}"), now);
        }
    }
}

async fn run_tui(config: Settings, base_dir: &Path) -> Result<()> {
    let _log_guard =
        telemetry::init_file_logging(&settings::log_dir(base_dir), &config.log_level);

    let client = connect(&config)?;
    let push_url = if config.push_enabled {
        match config.push_url() {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "push channel disabled");
                None
            }
        }
    } else {
        None
    };
    let github_token = settings::resolve_github_token(
        std::env::var("GITHUB_TOKEN").ok(),
        dirs::home_dir().as_deref(),
    );
    tracing::info!(
        server = %config.server_url,
        push = push_url.is_some(),
        "starting dashboard"
    );

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableBracketedPaste
    )?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    // Set up channels between Backend and UiApp
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel(64);
    let (event_tx, event_rx) = tokio::sync::mpsc::channel(256);

    let backend = Backend::new(
        Arc::new(client),
        event_tx,
        config.poll_interval(),
        push_url,
    );
    tokio::spawn(backend.run(cmd_rx));

    let mut app = UiApp::new(
        cmd_tx,
        event_rx,
        usize::from(config.near_bottom_rows),
        github_token,
    );
    let mut events = EventHandler::new(EVENT_TICK_RATE);

    let result = event_loop(&mut terminal, &mut app, &mut events).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;

    result
}

async fn event_loop(terminal: &mut Term, app: &mut UiApp, events: &mut EventHandler) -> Result<()> {
    let mut clipboard = match arboard::Clipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(e) => {
            tracing::info!(error = %e, "clipboard unavailable");
            None
        }
    };

    // The first frame measures the panels; the second uses them.
    terminal.draw(|frame| ui::draw(frame, app))?;
    app.sync_viewports();
    terminal.draw(|frame| ui::draw(frame, app))?;

    // Main loop: no .await besides input. The UI never blocks on I/O.
    loop {
        if app.should_quit {
            break;
        }

        match events.next().await {
            Some(Event::Key(key)) => app.handle_key(key),
            Some(Event::Paste(text)) => app.handle_paste(text),
            Some(Event::Mouse(mouse)) => {
                if !matches!(mouse.kind, MouseEventKind::Moved) {
                    app.handle_mouse(mouse);
                }
            }
            Some(Event::Tick) => app.on_tick(Instant::now()),
            Some(Event::Resize(_, _)) => app.needs_redraw = true,
            None => break,
        }

        if let Some(text) = app.take_clipboard_request() {
            copy_to_clipboard(&mut clipboard, app, text);
        }

        // Only redraw when state has actually changed
        if app.needs_redraw {
            app.sync_viewports();
            terminal.draw(|frame| ui::draw(frame, app))?;
            app.needs_redraw = false;
        }
    }
    Ok(())
}
