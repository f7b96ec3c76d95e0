//! mender: remediation sessions for a Linux desktop.
//!
//! Usage:
//!   mender fix                      interactive session, every command confirmed
//!   mender fix --autonomous -y      one consent, model-driven to completion
//!   mender scan --modules audio     diagnose only; no model, nothing executed
//!   mender providers                list model provider profiles

mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mender_agent::{Session, SessionDeps};
use mender_contracts::{
    error::{MenderError, MenderResult},
    session::{ModuleFilter, SessionConfig, SessionMode, SessionSummary, Termination},
};
use mender_core::{
    traits::{FactCollector, KnowledgeSource},
    SessionConsent, ShellRunner,
};
use mender_graph::{builtin_rules, infer, OrderingTable, ProblemGraph};
use mender_oracle::{OracleClient, ProviderKind, ProviderOverrides, ProviderRegistry, ProviderSettings, RetryPolicy};
use mender_policy::SafetyPolicy;
use mender_ref_linux::{default_sources, discover_sensitive_context, http_client, LinuxCollector};
use mender_sanitize::Sanitizer;

use crate::terminal::{ask_consent, print_problems, TerminalObserver, TerminalOperator};

/// Per-source timeout for web knowledge searches.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(8);

// ── CLI definition ────────────────────────────────────────────────────────────

/// mender: model-assisted troubleshooting with a safety gate on every command.
#[derive(Parser)]
#[command(
    name = "mender",
    version,
    about = "Diagnose and fix common Linux desktop problems with a language model",
    long_about = "Collects facts about this machine, masks identifying values, asks a model\n\
                  for fixes and runs them through a forbidden-command gate, with an\n\
                  append-only, hash-chained log of everything executed."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a remediation session.
    Fix(FixArgs),
    /// Collect facts and print the ordered problem list.
    Scan(ScanArgs),
    /// List the supported model providers.
    Providers,
}

#[derive(Args)]
struct FixArgs {
    /// Let the model drive; a single consent covers every command.
    #[arg(long)]
    autonomous: bool,

    /// Grant the autonomous consent without prompting.
    #[arg(short = 'y', long)]
    yes: bool,

    /// Maximum number of commands run in the session.
    #[arg(long, default_value_t = 10)]
    max_fixes: u32,

    /// Session time limit in seconds.
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// Per-command time limit in seconds.
    #[arg(long, default_value_t = 120)]
    command_timeout: u64,

    /// Comma-separated modules to diagnose (audio, disk, logs, memory,
    /// network, packages, services, system, thumbnails). Default: all.
    #[arg(long, default_value = "all")]
    modules: String,

    /// Show what would run without running anything.
    #[arg(long)]
    dry_run: bool,

    /// Knowledge searches allowed in the session; 0 disables web search.
    #[arg(long, default_value_t = 3)]
    max_searches: u32,

    #[command(flatten)]
    provider: ProviderArgs,

    /// TOML file with extra forbidden patterns and elevation settings.
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// TOML file replacing the built-in problem ordering rules.
    #[arg(long, value_name = "FILE")]
    ordering: Option<PathBuf>,

    /// Print model output as it arrives.
    #[arg(long)]
    stream: bool,

    /// Write the session summary as JSON to this file.
    #[arg(long, value_name = "FILE")]
    summary_json: Option<PathBuf>,
}

#[derive(Args)]
struct ProviderArgs {
    /// Model provider: gemini, openai, xai, openrouter or ollama.
    #[arg(long, env = "MENDER_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Model name; defaults to the provider profile.
    #[arg(long, env = "MENDER_MODEL")]
    model: Option<String>,

    /// API key; defaults to the provider's key variable.
    #[arg(long, env = "MENDER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Override the provider base URL.
    #[arg(long, env = "MENDER_BASE_URL")]
    base_url: Option<String>,
}

#[derive(Args)]
struct ScanArgs {
    #[arg(long, default_value = "all")]
    modules: String,

    /// TOML file replacing the built-in problem ordering rules.
    #[arg(long, value_name = "FILE")]
    ordering: Option<PathBuf>,

    /// Also print the facts as they would be sent to a model.
    #[arg(long)]
    facts: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Fix(args) => run_fix(args).await,
        Command::Scan(args) => run_scan(args).await.map(|()| ExitCode::SUCCESS),
        Command::Providers => {
            list_providers();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mender: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ── fix ───────────────────────────────────────────────────────────────────────

fn ordering_table(path: Option<&PathBuf>) -> MenderResult<OrderingTable> {
    match path {
        Some(path) => OrderingTable::from_file(path),
        None => Ok(OrderingTable::default()),
    }
}

fn oracle_client(args: &ProviderArgs) -> MenderResult<OracleClient> {
    let kind: ProviderKind = args.provider.parse()?;
    let overrides = ProviderOverrides {
        api_key: args.api_key.clone(),
        model: args.model.clone(),
        base_url: args.base_url.clone(),
    };
    let settings = ProviderSettings::from_env(kind, overrides)?;
    let backend = ProviderRegistry::new(settings).create_backend()?;
    Ok(OracleClient::new(backend, RetryPolicy::default()))
}

fn knowledge_sources(enabled: bool) -> MenderResult<Vec<Arc<dyn KnowledgeSource>>> {
    if !enabled {
        return Ok(Vec::new());
    }
    let client = http_client(SEARCH_TIMEOUT)?;
    Ok(default_sources(&client)
        .into_iter()
        .map(|source| Arc::new(source) as Arc<dyn KnowledgeSource>)
        .collect())
}

async fn run_fix(args: FixArgs) -> MenderResult<ExitCode> {
    let mode = if args.autonomous {
        SessionMode::Autonomous
    } else {
        SessionMode::HumanInTheLoop
    };
    let config = SessionConfig {
        mode,
        max_fixes: args.max_fixes,
        session_timeout: Duration::from_secs(args.timeout),
        command_timeout: Duration::from_secs(args.command_timeout),
        modules: ModuleFilter::parse(&args.modules),
        dry_run: args.dry_run,
        max_searches: args.max_searches,
        ..SessionConfig::default()
    };

    let policy = match &args.policy {
        Some(path) => SafetyPolicy::from_file(path)?,
        None => SafetyPolicy::builtin(),
    };

    let deps = SessionDeps {
        collector: Arc::new(LinuxCollector::new()),
        oracle: oracle_client(&args.provider)?,
        policy: Box::new(policy),
        runner: Box::new(ShellRunner::new()),
        knowledge: knowledge_sources(args.max_searches > 0)?,
        sensitive: discover_sensitive_context(),
        observer: Arc::new(TerminalObserver::new(args.stream)),
        ordering: ordering_table(args.ordering.as_ref())?,
        rules: builtin_rules().to_vec(),
        stream: args.stream,
    };

    let consent = match mode {
        SessionMode::Autonomous if args.yes => Some(SessionConsent::granted()),
        SessionMode::Autonomous => {
            if !ask_consent(args.max_fixes, args.dry_run) {
                println!("No consent given; nothing was run.");
                return Ok(ExitCode::SUCCESS);
            }
            Some(SessionConsent::granted())
        }
        SessionMode::HumanInTheLoop => None,
    };

    let session = Session::new(config, deps)?;
    info!(session_id = %session.id(), %mode, "session created");

    // Ctrl+C ends the session the same way the deadline does.
    let deadline = session.deadline();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; ending the session");
            deadline.expire_now();
        }
    });

    let summary = match consent {
        Some(consent) => session.run_autonomous(consent).await,
        None => session.run_hitl(&TerminalOperator::new()).await,
    };

    print_summary(&summary);
    if let Some(path) = &args.summary_json {
        write_summary(&summary, path)?;
        println!("Summary written to {}", path.display());
    }

    Ok(if summary.termination.is_abort() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn write_summary(summary: &SessionSummary, path: &PathBuf) -> MenderResult<()> {
    let json = serde_json::to_string_pretty(summary).map_err(|e| MenderError::ConfigError {
        reason: format!("cannot serialize summary: {e}"),
    })?;
    std::fs::write(path, json).map_err(|e| MenderError::ConfigError {
        reason: format!("cannot write {}: {e}", path.display()),
    })
}

fn print_summary(summary: &SessionSummary) {
    println!();
    println!("Session {} ({})", summary.session_id, summary.mode);
    println!("=================================");
    println!("  ended:     {}", summary.termination);
    if summary.termination == Termination::TimedOut {
        println!("             commands still running were stopped");
    }
    println!("  actions:   {}", summary.actions_taken);

    if !summary.executions.is_empty() {
        println!("  executed:");
        for result in &summary.executions {
            let status = if result.succeeded() { "ok" } else { "failed" };
            println!("    [{status}] {}", result.command);
        }
    }
    if !summary.resolved.is_empty() {
        println!("  resolved:");
        for p in &summary.resolved {
            println!("    {}/{}: {}", p.module, p.check, p.description);
        }
    }
    if !summary.pending.is_empty() {
        println!("  still open:");
        for p in &summary.pending {
            println!("    [{}] {}/{}: {}", p.severity, p.module, p.check, p.description);
        }
    }
    if !summary.blocked.is_empty() {
        println!("  blocked:");
        for b in &summary.blocked {
            println!("    {}: {}", b.command, b.reason);
        }
    }
    if !summary.searches.is_empty() {
        println!("  searches:  {}", summary.searches.len());
    }
    if !summary.errors.is_empty() {
        println!("  errors:");
        for e in &summary.errors {
            println!("    {e}");
        }
    }
    let masked: Vec<String> = summary
        .anonymization
        .nonzero()
        .map(|(category, n)| format!("{} x{}", category.as_str(), n))
        .collect();
    if !masked.is_empty() {
        println!("  masked:    {}", masked.join(", "));
    }
    if !summary.log_terminal_hash.is_empty() {
        println!("  log hash:  {}", summary.log_terminal_hash);
    }
    println!();
}

// ── scan ──────────────────────────────────────────────────────────────────────

async fn run_scan(args: ScanArgs) -> MenderResult<()> {
    let modules = ModuleFilter::parse(&args.modules);
    let facts = LinuxCollector::new().collect(&modules).await?;
    let facts = facts.retain_modules(|m| modules.allows(m));

    if args.facts {
        let sanitized = Sanitizer::new(&discover_sensitive_context()).sanitize(&facts);
        println!("Facts (as a model would see them):");
        println!("{}", sanitized.text);
    }

    let graph = ProblemGraph::build(infer(&facts, builtin_rules()), ordering_table(args.ordering.as_ref())?);
    println!("Problems, in fix order:");
    print_problems(&graph.schedule().sequence);
    if let Some(cycle) = &graph.schedule().cycle {
        let nodes: Vec<String> = cycle.nodes.iter().map(|f| f.to_string()).collect();
        println!("  ordering rules conflict for: {}", nodes.join(", "));
    }
    Ok(())
}

// ── providers ─────────────────────────────────────────────────────────────────

fn list_providers() {
    println!("{:<12} {:<20} {:<22} {}", "PROVIDER", "MODEL", "KEY", "BASE URL");
    for (kind, profile) in ProviderRegistry::profiles() {
        let key = match profile.key_env {
            None => "(not needed)".to_string(),
            Some(var) if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) => format!("{var} (set)"),
            Some(var) => var.to_string(),
        };
        println!("{:<12} {:<20} {:<22} {}", kind.as_str(), profile.model, key, profile.base_url);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
