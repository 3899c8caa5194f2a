use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use recruit_sync::config::{EscalationPolicy, ExamConfig};
use recruit_sync::exam::{
    ChannelSink, CompletionCommand, ExamInput, ExamRunner, ExamSession, SectionId, Signal,
    ViolationKind, ViolationSummary,
};
use recruit_sync::feed::replay::{fold, load_envelopes, load_snapshot, ReplaySummary};
use recruit_sync::feed::{EntityKind, FeedFilter, MirrorStore, Record};
use recruit_sync::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "recruit-sync")]
#[command(version)]
#[command(about = "Change-feed mirroring and proctored exam sessions")]
#[command(propagate_version = true)]
struct Args {
    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Fold a change log into a snapshot and print the mirrored collection
    Replay(ReplayArgs),

    /// Run an exam session driven by a scripted signal file
    Exam(ExamArgs),
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Replay Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Entity kind to mirror (jobs, applications/candidates, interviews)
    #[arg(long, default_value = "jobs")]
    kind: EntityKind,

    /// Initial snapshot (JSON array of records)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Change log (JSON lines, normalized envelopes or raw realtime payloads)
    #[arg(long)]
    log: PathBuf,

    /// Parent-key filter, e.g. "job_id=4"
    #[arg(long)]
    filter: Option<FeedFilter>,
}

// =============================================================================
// Exam Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ExamArgs {
    /// Candidate identifier
    #[arg(long)]
    candidate: String,

    /// Job the assessment belongs to
    #[arg(long)]
    job: u64,

    /// Sections in program order (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "psychometric,technical-text,coding"
    )]
    sections: Vec<SectionId>,

    /// Time limit in seconds (no limit if omitted)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Auto-submit after this many violations
    #[arg(long, conflicts_with = "max_score")]
    max_violations: Option<u32>,

    /// Auto-submit once the summed violation severity reaches this score
    #[arg(long)]
    max_score: Option<u32>,

    /// Cooldown between recorded focus-loss violations, in milliseconds
    #[arg(long, default_value = "3000")]
    focus_cooldown_ms: u64,

    /// Shortest visibility or focus loss that counts as a violation, in milliseconds
    #[arg(long, default_value = "2000")]
    min_loss_ms: u64,

    /// Signal script (JSON lines: {"after_ms": 500, "input": "visibility_lost"})
    #[arg(long)]
    script: PathBuf,
}

/// One line of an exam signal script.
#[derive(Debug, Deserialize)]
struct ScriptStep {
    /// Delay before this step, relative to the previous one
    #[serde(default)]
    after_ms: u64,
    #[serde(flatten)]
    action: ScriptAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "input", rename_all = "snake_case")]
enum ScriptAction {
    VisibilityLost,
    VisibilityRestored,
    FocusLost,
    FocusRegained,
    NavigationRequested { target: SectionId },
    NavigationConfirmed { target: SectionId },
    NavigationDeclined { target: SectionId },
    Advance { target: SectionId },
    Submit,
}

impl From<ScriptAction> for ExamInput {
    fn from(action: ScriptAction) -> Self {
        match action {
            ScriptAction::VisibilityLost => Signal::VisibilityLost.into(),
            ScriptAction::VisibilityRestored => Signal::VisibilityRestored.into(),
            ScriptAction::FocusLost => Signal::FocusLost.into(),
            ScriptAction::FocusRegained => Signal::FocusRegained.into(),
            ScriptAction::NavigationRequested { target } => {
                Signal::NavigationRequested { target }.into()
            }
            ScriptAction::NavigationConfirmed { target } => {
                Signal::NavigationConfirmed { target }.into()
            }
            ScriptAction::NavigationDeclined { target } => {
                Signal::NavigationDeclined { target }.into()
            }
            ScriptAction::Advance { target } => ExamInput::Advance(target),
            ScriptAction::Submit => ExamInput::Submit,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ReplayOutput {
    entity: EntityKind,
    summary: ReplaySummary,
    records: Vec<Record>,
}

#[derive(Serialize)]
struct ExamOutput {
    session: ExamSession,
    summary: ViolationSummary,
    commands: Vec<CompletionCommand>,
}

// =============================================================================
// Replay
// =============================================================================

async fn run_replay(
    args: ReplayArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let initial = match &args.snapshot {
        Some(path) => load_snapshot(path).await?,
        None => Vec::new(),
    };
    let mut envelopes = load_envelopes(&args.log).await?;
    if let Some(filter) = &args.filter {
        envelopes.retain(|envelope| filter.matches(envelope));
    }

    let mut store = MirrorStore::with_snapshot(args.kind, initial);
    let summary = fold(&mut store, envelopes);

    match output_format {
        OutputFormat::Json => {
            let output = ReplayOutput {
                entity: args.kind,
                summary,
                records: store.snapshot(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "{} applied: {} inserted, {} replaced, {} updated, {} deleted, {} ignored",
                args.kind,
                summary.inserted,
                summary.replaced,
                summary.updated,
                summary.deleted,
                summary.ignored
            );
            println!("{:<38} RECORD", "ID");
            println!("{}", "-".repeat(78));
            for (id, record) in store.ids().iter().zip(store.snapshot()) {
                println!("{:<38} {}", id, serde_json::Value::Object(record));
            }
            println!();
            println!("{} records", store.len());
        }
    }
    Ok(())
}

// =============================================================================
// Exam
// =============================================================================

async fn load_script(path: &Path) -> Result<Vec<ScriptStep>, Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut steps = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ScriptStep = serde_json::from_str(line)
            .map_err(|e| format!("{}:{}: {}", path.display(), number + 1, e))?;
        steps.push(step);
    }
    Ok(steps)
}

fn exam_config(args: &ExamArgs) -> ExamConfig {
    let escalation = match (args.max_violations, args.max_score) {
        (Some(limit), _) => EscalationPolicy::ViolationCount { limit },
        (None, Some(limit)) => EscalationPolicy::SeverityScore { limit },
        (None, None) => EscalationPolicy::Disabled,
    };
    let mut config = ExamConfig::default()
        .with_escalation(escalation)
        .with_min_loss_duration(Duration::from_millis(args.min_loss_ms))
        .with_cooldown(
            ViolationKind::FocusLoss,
            Duration::from_millis(args.focus_cooldown_ms),
        );
    if let Some(secs) = args.duration_secs {
        config = config.with_duration(Duration::from_secs(secs));
    }
    config
}

async fn run_exam(
    args: ExamArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let steps = load_script(&args.script).await?;
    let config = exam_config(&args);
    let has_deadline = config.duration.is_some();
    let shutdown = install_shutdown_handler();

    let (sink, mut command_rx) = ChannelSink::channel(64);
    let collector = tokio::spawn(async move {
        let mut commands = Vec::new();
        while let Some(command) = command_rx.recv().await {
            commands.push(command);
        }
        commands
    });

    let (input_tx, input_rx) = mpsc::channel::<ExamInput>(64);
    let feeder_shutdown = shutdown.clone();
    let feeder = tokio::spawn(async move {
        for step in steps {
            tokio::select! {
                _ = feeder_shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(step.after_ms)) => {}
            }
            if input_tx.send(step.action.into()).await.is_err() {
                // Session already finished
                return;
            }
        }
        if has_deadline {
            // Keep the session open until the timer or a shutdown ends it.
            input_tx.closed().await;
        }
    });

    tracing::info!(
        candidate_id = %args.candidate,
        job_id = args.job,
        sections = ?args.sections,
        escalation = ?config.escalation,
        "Starting exam session"
    );

    let session = ExamSession::new(args.candidate.clone(), args.job);
    let runner = ExamRunner::new(session, config, Arc::new(sink));
    let session = runner.run(args.sections.clone(), input_rx, shutdown).await;

    feeder.abort();
    let commands = collector.await?;

    match output_format {
        OutputFormat::Json => {
            let output = ExamOutput {
                summary: session.violation_summary(),
                session,
                commands,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Session:    {}", session.id());
            println!("State:      {}", session.state());
            if let Some(reason) = session.end_reason() {
                println!("Ended:      {}", reason);
            }
            if let Some(section) = session.current_section() {
                println!("Section:    {}", section);
            }
            let summary = session.violation_summary();
            println!("Violations: {}", summary.total);
            for (severity, count) in &summary.by_severity {
                println!("  {:<10} {}", severity, count);
            }
            for violation in session.violations() {
                println!(
                    "  {}  {:<20} {}",
                    violation.timestamp.to_rfc3339(),
                    violation.kind,
                    violation.section_id
                );
            }
            println!("Commands:   {}", commands.len());
            for command in &commands {
                println!("  {:<18} {}", command.kind, command.section_id);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Replay(replay_args) => run_replay(replay_args, &args.output).await?,
        Commands::Exam(exam_args) => run_exam(exam_args, &args.output).await?,
    }

    Ok(())
}
