#![forbid(unsafe_code)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipsolve::clipboard::{
    ClipboardContent, ClipboardTransport, ConsoleClipboard, MemoryClipboard, StatusSurface,
    TracingStatus,
};
use clipsolve::config::{SolverConfig, CONFIG_FILE};
use clipsolve::gateway::{CompletionInvoker, ImageInput, OpenAiResponsesAdapter};
use clipsolve::graph::{extract_graph_evidence, parse_graph_evidence, Extraction, INVALID_GRAPH};
use clipsolve::prompts::ProblemInput;
use clipsolve::reference::prime::ReferencePrimer;
use clipsolve::reference::ReferenceStore;
use clipsolve::solve::{ModelSwitch, SolveContext, SolveOutcome};
use clipsolve::telemetry::{JsonlTelemetrySink, TelemetrySink, TelemetryWorker, TracingTelemetry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "clipsolve", version, about = "Clipboard math solver CLI")]
struct Cli {
    /// Directory holding config.json, the reference store and telemetry
    #[arg(long, global = true, default_value = ".")]
    home: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a problem given as text or an image file
    Solve {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Toggle the pinned reference (clears it when one is active)
    Star {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Clear the pinned reference
    ClearReference,
    /// Turn reference graph mode on or off
    GraphMode {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Run graph evidence extraction on an image and print the block
    ExtractGraph {
        #[arg(long)]
        image: PathBuf,
    },
    /// Parse a GRAPH_EVIDENCE block from a file (or stdin) and print it as JSON
    ParseEvidence {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Probe the selected and graph extraction models
    Probe,
    /// Switch the active model
    SetModel { model: String },
    /// Advance to the next configured model
    CycleModel,
    /// Long-running session driven by line commands on stdin
    Session,
}

#[derive(clap::Args)]
#[group(required = false, multiple = false)]
struct InputArgs {
    /// Problem text
    #[arg(long)]
    text: Option<String>,
    /// Problem image (png, jpg, gif, webp)
    #[arg(long)]
    image: Option<PathBuf>,
}

impl InputArgs {
    fn content(&self) -> Result<ClipboardContent, std::io::Error> {
        if let Some(text) = &self.text {
            return Ok(ClipboardContent::Text(text.clone()));
        }
        if let Some(path) = &self.image {
            return Ok(ClipboardContent::Image(ImageInput::from_path(path)?));
        }
        Ok(ClipboardContent::Empty)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

// =============================================================================
// Wiring
// =============================================================================

/// Everything a command needs, built once from the home directory.
struct Services {
    config: SolverConfig,
    config_path: PathBuf,
    store: Arc<ReferenceStore>,
    invoker: CompletionInvoker,
    status: Arc<dyn StatusSurface>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Services {
    /// An empty `telemetry_file` routes telemetry to the log instead of a file.
    fn open(home: &Path) -> Result<(Self, Option<TelemetryWorker>), Box<dyn std::error::Error>> {
        std::fs::create_dir_all(home)?;
        let config_path = home.join(CONFIG_FILE);
        let config = SolverConfig::load(&config_path)?;

        let (telemetry, worker): (Arc<dyn TelemetrySink>, _) = if config.telemetry_file.is_empty() {
            (Arc::new(TracingTelemetry), None)
        } else {
            let (sink, worker) = JsonlTelemetrySink::new(home.join(&config.telemetry_file))?;
            (Arc::new(sink), Some(worker))
        };

        let adapter = OpenAiResponsesAdapter::with_config(
            config.resolve_api_key()?,
            config.resolve_base_url(),
            CONNECT_TIMEOUT,
        )?;
        let invoker = CompletionInvoker::new(Arc::new(adapter), telemetry.clone());
        let store = Arc::new(ReferenceStore::new(home, telemetry.clone()));

        Ok((
            Self {
                config,
                config_path,
                store,
                invoker,
                status: Arc::new(TracingStatus),
                telemetry,
            },
            worker,
        ))
    }

    fn solver(&self, clipboard: Arc<dyn ClipboardTransport>) -> SolveContext {
        SolveContext::new(
            self.config.clone(),
            self.invoker.clone(),
            self.store.clone(),
            clipboard,
            self.status.clone(),
            self.telemetry.clone(),
        )
        .with_config_path(&self.config_path)
    }

    fn primer(&self, clipboard: Arc<dyn ClipboardTransport>) -> ReferencePrimer {
        ReferencePrimer::new(
            self.store.clone(),
            self.invoker.clone(),
            clipboard,
            self.status.clone(),
            self.telemetry.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipsolve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::ParseEvidence { file } = &cli.command {
        return parse_evidence(file.as_deref());
    }

    let (services, worker) = Services::open(&cli.home)?;
    let result = run(&services, cli.command).await;

    // The worker drains once every sink handle is gone.
    drop(services);
    if let Some(Err(e)) = worker.map(TelemetryWorker::join) {
        tracing::warn!(error = %e, "telemetry writer failed");
    }
    result
}

async fn run(services: &Services, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Solve { input } => {
            let solver = services.solver(ConsoleClipboard::new(input.content()?));
            report_solve(solver.solve().await)?;
        }
        Commands::Star { input } => {
            let primer = services.primer(ConsoleClipboard::new(input.content()?));
            let outcome = primer.toggle_reference(&services.config).await;
            println!("{outcome:?}");
            println!("{}", serde_json::to_string_pretty(&services.store.load()?)?);
        }
        Commands::ClearReference => {
            services.store.clear("cli");
            services.status.announce("REF CLEARED");
        }
        Commands::GraphMode { state } => {
            let enabled = services.store.set_graph_mode(matches!(state, Toggle::On))?;
            println!("graph mode: {}", if enabled { "on" } else { "off" });
        }
        Commands::ExtractGraph { image } => {
            let image = ImageInput::from_path(&image)?;
            let extraction = extract_graph_evidence(
                &services.invoker,
                &image,
                &services.config.graph_extraction_model,
                services.config.graph_extraction_timeout(),
            )
            .await?;
            match extraction {
                Extraction::NotAGraph => println!("{INVALID_GRAPH}"),
                Extraction::Evidence(text) => {
                    println!("{text}");
                    if let Err(e) = parse_graph_evidence(&text) {
                        eprintln!("evidence rejected ({}): {e}", e.code());
                    }
                }
            }
        }
        Commands::ParseEvidence { .. } => {}
        Commands::Probe => {
            let report = services
                .solver(ConsoleClipboard::new(ClipboardContent::Empty))
                .startup_probes()
                .await;
            println!(
                "selected model online: {}\ngraph extraction online: {}",
                report.selected_model_online, report.graph_extraction_online
            );
        }
        Commands::SetModel { model } => {
            let solver = services.solver(ConsoleClipboard::new(ClipboardContent::Empty));
            report_switch(solver.switch_model(&model).await)?;
        }
        Commands::CycleModel => {
            let solver = services.solver(ConsoleClipboard::new(ClipboardContent::Empty));
            report_switch(solver.cycle_model().await)?;
        }
        Commands::Session => session(services).await?,
    }
    Ok(())
}

fn report_solve(outcome: SolveOutcome) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        SolveOutcome::Succeeded(report) => {
            tracing::info!(
                request_id = %report.request_id,
                model = %report.model,
                attempts = report.attempts,
                mismatches = report.mismatches.len(),
                "solved"
            );
            Ok(())
        }
        SolveOutcome::Failed(e) => Err(e.into()),
        SolveOutcome::Cancelled => Err("solve cancelled".into()),
        SolveOutcome::Busy => Err("a solve is already running".into()),
    }
}

fn report_switch(switch: ModelSwitch) -> Result<(), Box<dyn std::error::Error>> {
    match switch {
        ModelSwitch::Activated { new, .. } => {
            println!("active model: {new}");
            Ok(())
        }
        ModelSwitch::Rejected(message) => Err(message.into()),
        ModelSwitch::Busy => Err("a model switch is already running".into()),
    }
}

fn parse_evidence(file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    match parse_graph_evidence(&text) {
        Ok(evidence) => {
            println!("{}", serde_json::to_string_pretty(&evidence)?);
            Ok(())
        }
        Err(e) => Err(format!("invalid evidence ({}): {e}", e.code()).into()),
    }
}

// =============================================================================
// Session
// =============================================================================

const SESSION_HELP: &str = "commands:
  solve <text> | solve-image <path>     solve in the background
  star [text] | star-image <path>       toggle the pinned reference
  graph on|off                          set reference graph mode
  model <name> | cycle                  switch the active model
  cancel                                cancel the running solve
  quit";

/// Line-driven stand-in for the hotkey loop. Solves run as background tasks
/// so a model switch can cancel one in flight.
async fn session(services: &Services) -> Result<(), Box<dyn std::error::Error>> {
    let clipboard = Arc::new(MemoryClipboard::new());
    clipboard.on_write(|text| println!("{text}\n----------------------------------------"));

    let solver = Arc::new(services.solver(clipboard.clone()));
    let primer = services.primer(clipboard.clone());

    services.store.clear("startup");
    services.status.announce("REF CLEARED ON STARTUP");

    let probes = solver.startup_probes().await;
    primer.set_graph_extraction_enabled(probes.graph_extraction_online);

    println!("{SESSION_HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut running: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        running.retain(|h| !h.is_finished());
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match verb {
            "" => {}
            "quit" | "exit" => break,
            "help" => println!("{SESSION_HELP}"),
            "solve" | "solve-image" => {
                let input = if verb == "solve" {
                    ProblemInput::Text(rest.to_string())
                } else {
                    match ImageInput::from_path(rest) {
                        Ok(image) => ProblemInput::Image(image),
                        Err(e) => {
                            eprintln!("cannot read image {rest}: {e}");
                            continue;
                        }
                    }
                };
                let solver = solver.clone();
                running.push(tokio::spawn(async move {
                    if let Err(e) = report_solve(solver.solve_input(input).await) {
                        eprintln!("{e}");
                    }
                }));
            }
            "star" | "star-image" => {
                if verb == "star-image" {
                    match ImageInput::from_path(rest) {
                        Ok(image) => clipboard.set(ClipboardContent::Image(image)),
                        Err(e) => {
                            eprintln!("cannot read image {rest}: {e}");
                            continue;
                        }
                    }
                } else if !rest.is_empty() {
                    clipboard.set(ClipboardContent::Text(rest.to_string()));
                }
                let outcome = primer.toggle_reference(&solver.config()).await;
                tracing::debug!(?outcome, "reference toggled");
            }
            "graph" => match rest {
                "on" | "off" => match services.store.set_graph_mode(rest == "on") {
                    Ok(enabled) => {
                        services
                            .status
                            .announce(if enabled { "GRAPH MODE ON" } else { "GRAPH MODE OFF" });
                    }
                    Err(e) => eprintln!("graph mode not saved: {e}"),
                },
                _ => eprintln!("usage: graph on|off"),
            },
            "model" => {
                let _ = solver.switch_model(rest).await;
            }
            "cycle" => {
                let _ = solver.cycle_model().await;
            }
            "cancel" => {
                if !solver.cancel_in_flight() {
                    println!("no solve running");
                }
            }
            other => eprintln!("unknown command '{other}'; try help"),
        }
    }

    for handle in running {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "solve task failed");
        }
    }

    services.store.clear("exit");
    services.status.announce("REF CLEARED ON EXIT");
    Ok(())
}
