use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;

use orgsync_sync::{
    ActionStatus, InMemoryDestination, InMemoryRunStatusStore, InMemorySource, Orchestrator,
    Scope, SyncConfig, SyncFixture, SyncReport,
};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Sync(args) => cmd_sync(args, &cli.format).await,
        Command::Diff(args) => cmd_diff(args, &cli.format).await,
        Command::CheckConfig(args) => cmd_check_config(args, &cli.format),
    }
}

struct Workspace {
    fixture: SyncFixture,
    destination: Arc<InMemoryDestination>,
    orchestrator: Orchestrator,
}

fn open(config: &Path, fixture: &Path, dry_run: bool) -> anyhow::Result<Workspace> {
    let mut config = SyncConfig::load(config)
        .with_context(|| format!("loading config {}", config.display()))?;
    config.dry_run |= dry_run;
    let fixture = SyncFixture::load(fixture)
        .with_context(|| format!("loading fixture {}", fixture.display()))?;

    let as_of = fixture.as_of();
    let source = Arc::new(InMemorySource::new(fixture.source.clone(), as_of));
    let destination = Arc::new(InMemoryDestination::new(fixture.destination.clone(), as_of));
    let status = Arc::new(
        fixture
            .run_status
            .map(InMemoryRunStatusStore::with_status)
            .unwrap_or_default(),
    );
    let orchestrator =
        Orchestrator::new(source, destination.clone(), status, config)?.with_as_of(as_of);
    Ok(Workspace {
        fixture,
        destination,
        orchestrator,
    })
}

async fn cmd_sync(args: SyncArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let Workspace {
        mut fixture,
        destination,
        orchestrator,
    } = open(&args.config, &args.fixture, args.dry_run)?;

    let scope = match (args.unit, args.person) {
        (Some(unit), _) => Scope::Unit(unit),
        (None, Some(cpr)) => Scope::Person(cpr),
        (None, None) => Scope::Institution,
    };
    let report = orchestrator.reconcile(scope).await?;

    match format {
        OutputFormat::Json => {
            let body = json!({ "report": report, "summary": report.summary() });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => print_report(&report),
    }

    if let Some(path) = args.save {
        fixture.destination = destination.snapshot()?;
        let text = serde_json::to_string_pretty(&fixture)?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        if matches!(format, OutputFormat::Text) {
            println!("Saved destination to {}", path.display().to_string().bold());
        }
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("{} Synced {}{}", "✓".green().bold(), report.scope.cyan(), mode.dimmed());

    for entity in &report.entities {
        if entity.actions.is_empty() && entity.skipped.is_empty() && entity.error.is_none() {
            continue;
        }
        println!("  {}", entity.key.to_string().bold());
        for record in &entity.actions {
            println!("    {} {}", status_label(&record.status), record.operation);
        }
        for skip in &entity.skipped {
            println!("    {} {}: {}", "skipped".yellow(), skip.validity, skip.reason);
        }
        if let Some(err) = &entity.error {
            println!("    {} {}: {}", "failed".red().bold(), err.kind, err.message);
        }
    }
    for record in &report.retirements {
        println!("  {} {}", status_label(&record.status), record.operation);
    }
    for alert in &report.alerts {
        println!(
            "  {} {} ({}) has live engagements; move it under {} by hand",
            "alert".yellow().bold(),
            alert.name,
            alert.unit,
            alert.intended_parent
        );
    }
    for failure in &report.tree_failures {
        println!("  {} {}: {}", "failed".red().bold(), failure.unit, failure.error);
    }

    let s = report.summary();
    println!(
        "\n{} applied, {} planned, {} skipped, {} held back, {} rejected, {} abandoned, {} failed",
        s.applied.to_string().green(),
        s.planned.to_string().cyan(),
        s.skipped_missing_data.to_string().yellow(),
        s.skipped_live_engagement.to_string().yellow(),
        s.mutation_rejected.to_string().red(),
        s.abandoned.to_string().dimmed(),
        s.failed.to_string().red(),
    );
}

fn status_label(status: &ActionStatus) -> colored::ColoredString {
    match status {
        ActionStatus::Applied { .. } => "applied".green(),
        ActionStatus::Planned => "planned".cyan(),
        ActionStatus::Rejected { .. } => "rejected".red(),
        ActionStatus::Abandoned => "abandoned".dimmed(),
    }
}

async fn cmd_diff(args: DiffArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let workspace = open(&args.config, &args.fixture, true)?;
    let diff = workspace.orchestrator.tree_diff().await?;

    match format {
        OutputFormat::Json => {
            let failures: Vec<_> = diff
                .failures
                .iter()
                .map(|f| json!({ "unit": f.unit, "error": f.error.to_string() }))
                .collect();
            let body = json!({
                "operations": diff.operations,
                "alerts": diff.alerts,
                "failures": failures,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            if diff.is_empty() {
                println!("{} Trees agree.", "✓".green().bold());
                return Ok(());
            }
            for op in &diff.operations {
                println!("  {}", op);
            }
            for alert in &diff.alerts {
                println!(
                    "  {} {} ({}) has live engagements",
                    "alert".yellow().bold(),
                    alert.name,
                    alert.unit
                );
            }
            for failure in &diff.failures {
                println!("  {} {}: {}", "failed".red().bold(), failure.unit, failure.error);
            }
        }
    }
    Ok(())
}

fn cmd_check_config(args: CheckConfigArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = SyncConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            println!("{} {} is valid", "✓".green().bold(), args.config.display());
            println!("  Institution: {}", config.institution.yellow());
            match config.obsolete_root {
                Some(root) => println!("  Obsolete root: {}", root.to_string().cyan()),
                None => println!("  Obsolete root: {}", "unset (unit and person scopes only)".dimmed()),
            }
            println!("  Concurrency: {}", config.concurrency);
            if config.dry_run {
                println!("  {}", "dry run".cyan());
            }
        }
    }
    Ok(())
}
