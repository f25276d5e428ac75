//! Stack lifecycle commands: up, preview, destroy, outputs, graph

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use chrono::{DateTime, Utc};
use declarative::{
    CancelToken, DependencyGraph, Engine, ExportValue, FileStateStore, RunOutcome, RunReport,
    Stack, StateStore, stack_outputs,
};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::{DestroyArgs, UpArgs};
use crate::config::NuageConfig;
use crate::program;
use crate::progress::BarProgress;
use crate::provider::{LocalProvider, builtin_policy};
use crate::ui;

/// Everything a stack command works with
struct Session {
    config: NuageConfig,
    stack: Stack,
    provider: LocalProvider,
}

impl Session {
    fn open(ctx: &Context) -> Result<Self> {
        let config = NuageConfig::load(&ctx.config)?;
        let stack = program::declare(&config.stack).context("Invalid stack declaration")?;
        let provider = LocalProvider::new(
            &config.stack.region,
            &config.stack.account_id,
            config.property_table(builtin_policy()),
        );
        Ok(Self {
            config,
            stack,
            provider,
        })
    }

    fn store(&self) -> Result<FileStateStore> {
        let dir = self.config.state_dir()?;
        Ok(FileStateStore::open(&dir, &self.config.stack.name))
    }
}

pub fn up(ctx: &Context, args: &UpArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let mut store = session.store()?;
    let engine = Engine::new(
        &session.provider,
        session.config.run_options(args.jobs, args.timeout),
    );

    let plan = engine
        .preview(&session.stack, &mut store)
        .context("Could not compute plan")?;
    ui::render_plan(&plan, false);
    if !plan.has_changes() {
        let (outputs, last_updated) = recorded_outputs(&session.stack, &mut store)?;
        ui::render_outputs(&outputs, Some(last_updated));
        return Ok(());
    }

    if !args.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    cancel_on_interrupt(engine.cancel_token())?;
    let mut progress = BarProgress::new(ctx.quiet);
    let report = engine
        .run(&session.stack, &mut store, &mut progress)
        .context("Run failed before any operation started")?;

    ui::render_report(&report);
    ui::render_outputs(&report.outputs, None);
    finish(&report)
}

pub fn preview(ctx: &Context, diff: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let mut store = session.store()?;
    let engine = Engine::new(&session.provider, session.config.run_options(None, None));

    let plan = engine
        .preview(&session.stack, &mut store)
        .context("Could not compute plan")?;
    ui::render_plan(&plan, diff);
    Ok(())
}

pub fn destroy(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let mut store = session.store()?;
    let state = store.load().context("Could not load stack state")?;

    ui::header(&format!("Destroy: {}", session.config.stack.name));
    if state.is_empty() {
        ui::success("Nothing to destroy.");
        return Ok(());
    }
    for entry in &state.entries {
        println!(
            "  {} {} {}",
            "-".red(),
            entry.id,
            format!("({})", entry.identity).dimmed()
        );
    }
    println!();
    ui::warn(&format!("{} resources will be deleted", state.entries.len()));

    if !args.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let engine = Engine::new(&session.provider, session.config.run_options(args.jobs, None));
    cancel_on_interrupt(engine.cancel_token())?;
    let mut progress = BarProgress::new(ctx.quiet);
    let report = engine
        .destroy(&session.config.stack.name, &mut store, &mut progress)
        .context("Destroy failed before any operation started")?;

    ui::render_report(&report);
    finish(&report)
}

pub fn outputs(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let mut store = session.store()?;
    let state = store.load().context("Could not load stack state")?;

    ui::header(&format!("Stack: {}", session.config.stack.name));
    ui::kv("State", &store.path().display().to_string());
    if state.is_empty() {
        ui::info("Stack has not been deployed. Run `nuage up` first.");
        return Ok(());
    }
    ui::kv("Resources", &state.entries.len().to_string());

    let outputs = stack_outputs(&session.stack, &state);
    ui::render_outputs(&outputs, Some(state.last_updated));
    Ok(())
}

pub fn graph(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let graph = DependencyGraph::build(&session.stack).context("Invalid stack declaration")?;

    ui::header(&format!(
        "Dependency graph: {} ({} resources)",
        session.stack.name(),
        graph.len()
    ));
    for id in graph.topological_order() {
        let kind = session
            .stack
            .resource_decl(&id)
            .map(|d| d.kind.as_str())
            .unwrap_or_default();
        println!("  {} {}", id.as_str().bold(), format!("({kind})").dimmed());

        let references = graph.references(&id);
        for dep in graph.dependencies(&id) {
            let marker = if references.contains(&dep) {
                "reads".cyan()
            } else {
                "after".yellow()
            };
            println!("      {marker} {dep}");
        }
    }
    Ok(())
}

/// Stack outputs resolved from stored state, and when it was last written
fn recorded_outputs(
    stack: &Stack,
    store: &mut dyn StateStore,
) -> Result<(BTreeMap<String, ExportValue>, DateTime<Utc>)> {
    let state = store.load().context("Could not load stack state")?;
    Ok((stack_outputs(stack, &state), state.last_updated))
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Ctrl-C stops dispatch; operations already running finish
fn cancel_on_interrupt(token: CancelToken) -> Result<()> {
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            eprintln!("\nInterrupted, waiting for running operations to finish");
        }
        token.cancel();
    })
    .context("Could not install interrupt handler")
}

fn finish(report: &RunReport) -> Result<()> {
    if let RunOutcome::Aborted { reason } = &report.outcome {
        bail!("Run aborted: {reason}");
    }
    let summary = report.summary();
    if !summary.is_success() {
        bail!(
            "{} operations failed, {} skipped",
            summary.failed,
            summary.skipped
        );
    }
    println!();
    ui::success(&format!("{} changes applied", summary.total_changes()));
    Ok(())
}
