use anyhow::{anyhow, Context as _, Result};
use clap::{Args, ValueEnum};
use forge_recon::{AdjudicationRequest, ContentHash, Decision, DriftStatus};
use serde::Serialize;

use super::util::{print_json, short_value, Context, OutputArgs};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DecisionArg {
    Accept,
    Reject,
    Defer,
}

impl From<DecisionArg> for Decision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::Accept => Decision::Accepted,
            DecisionArg::Reject => Decision::Rejected,
            DecisionArg::Defer => Decision::Deferred,
        }
    }
}

#[derive(Args)]
pub struct DriftArgs {
    /// Project name
    pub project: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct DiffArgs {
    pub project: String,
    pub entity_id: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct AdjudicateArgs {
    pub project: String,
    pub entity_id: String,
    #[arg(value_enum)]
    pub decision: DecisionArg,
    /// Content hash the decision was made on (from `drift` or `diff`)
    #[arg(long)]
    pub hash: String,
    /// Ledger revision the decision was made on; refuses if another review landed since
    #[arg(long)]
    pub revision: Option<i64>,
    #[arg(long)]
    pub notes: Option<String>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct BulkArgs {
    pub project: String,
    #[arg(value_enum)]
    pub decision: DecisionArg,
    #[arg(long)]
    pub notes: Option<String>,
    /// Only entries with this status
    #[arg(long, value_parser = parse_status)]
    pub status: Option<DriftStatus>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct HistoryArgs {
    pub project: String,
    pub entity_id: String,
    /// Most recent entries only
    #[arg(long)]
    pub limit: Option<usize>,
    #[command(flatten)]
    pub output: OutputArgs,
}

fn parse_status(raw: &str) -> Result<DriftStatus, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "new" => Ok(DriftStatus::New),
        "changed" => Ok(DriftStatus::Changed),
        "removed" => Ok(DriftStatus::Removed),
        "deferred" => Ok(DriftStatus::Deferred),
        other => Err(format!("unknown status '{other}'")),
    }
}

pub fn drift(ctx: &Context, args: DriftArgs) -> Result<()> {
    let project = ctx.project(&args.project)?;
    let report = project.list_drift()?;
    if args.output.json {
        return print_json(&report, args.output.pretty);
    }
    let s = &report.summary;
    println!(
        "{}: {} scanned, {} new, {} changed, {} removed, {} deferred, {} malformed",
        project.name(),
        s.scanned,
        s.new,
        s.changed,
        s.removed,
        s.deferred,
        s.malformed
    );
    for entry in &report.entries {
        let hash = entry
            .current_hash
            .as_ref()
            .map(|h| h.short().to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<8} {:<12} {:<16} {:<28} {} r{}",
            entry.status, entry.kind, entry.entity_id, entry.label, hash, entry.ledger_revision
        );
    }
    for warning in &report.warnings {
        println!("warning  {}: {}", warning.entity_id, warning.reason);
    }
    Ok(())
}

pub fn diff(ctx: &Context, args: DiffArgs) -> Result<()> {
    let project = ctx.project(&args.project)?;
    let diff = project.get_diff(&args.entity_id)?;
    if args.output.json {
        return print_json(&diff, args.output.pretty);
    }
    let status = diff.status.map(|s| s.to_string()).unwrap_or_else(|| "unchanged".into());
    println!("{} {} ({}) [{}]", diff.entity_id, diff.label, diff.kind, status);
    if let Some(hash) = &diff.current_hash {
        println!("hash     {} (revision {})", hash, diff.ledger_revision);
    }
    if let Some(change) = &diff.kind_change {
        println!("kind     {:?} -> {:?}", change.old, change.new);
    }
    if let Some(change) = &diff.label_change {
        println!("label    {:?} -> {:?}", change.old, change.new);
    }
    for delta in &diff.deltas {
        println!(
            "{:<9}{}: {} -> {}",
            delta.change_kind,
            delta.field,
            short_value(delta.old_value.as_ref()),
            short_value(delta.new_value.as_ref())
        );
    }
    Ok(())
}

pub fn adjudicate(ctx: &Context, args: AdjudicateArgs) -> Result<()> {
    let project = ctx.project(&args.project)?;
    let hash: ContentHash = args
        .hash
        .parse()
        .map_err(|e: String| anyhow!(e))
        .context("--hash")?;
    let mut request = AdjudicationRequest::new(args.entity_id, args.decision.into(), hash);
    request.expected_revision = args.revision;
    request.notes = args.notes;
    let done = project.adjudicate(&request)?;
    if args.output.json {
        return print_json(&done, args.output.pretty);
    }
    println!(
        "{} {} at revision {} ({})",
        done.entity_id,
        done.decision,
        done.revision,
        done.content_hash.short()
    );
    Ok(())
}

#[derive(Serialize)]
struct BulkSummary<'a> {
    decision: Decision,
    applied: Vec<&'a str>,
    stale: &'a [String],
    failed: &'a [forge_recon::BulkFailure],
    skipped: &'a [String],
}

pub fn bulk(ctx: &Context, args: BulkArgs) -> Result<()> {
    let project = ctx.project(&args.project)?;
    let mut report = project.list_drift()?;
    if let Some(status) = args.status {
        report.entries.retain(|e| e.status == status);
    }
    let decision: Decision = args.decision.into();
    let outcome = project.adjudicate_bulk(&report, decision, args.notes.as_deref())?;
    let summary = BulkSummary {
        decision,
        applied: outcome.applied.iter().map(|a| a.entity_id.as_str()).collect(),
        stale: &outcome.stale,
        failed: &outcome.failed,
        skipped: &outcome.skipped,
    };
    if args.output.json {
        print_json(&summary, args.output.pretty)?;
    } else {
        println!(
            "{}: {} applied, {} stale, {} failed, {} skipped",
            decision,
            summary.applied.len(),
            summary.stale.len(),
            summary.failed.len(),
            summary.skipped.len()
        );
        for failure in summary.failed {
            println!("failed   {}: {}", failure.entity_id, failure.error);
        }
    }
    if !outcome.failed.is_empty() {
        anyhow::bail!("{} adjudications failed", outcome.failed.len());
    }
    Ok(())
}

pub fn history(ctx: &Context, args: HistoryArgs) -> Result<()> {
    let project = ctx.project(&args.project)?;
    let rows = project.history(&args.entity_id, args.limit)?;
    if args.output.json {
        return print_json(&rows, args.output.pretty);
    }
    if rows.is_empty() {
        println!("{}: no adjudications", args.entity_id);
    }
    for row in &rows {
        let hash: ContentHash = row
            .content_hash
            .parse()
            .map_err(|e| anyhow!("history #{} holds a bad hash: {e}", row.seq))?;
        println!(
            "#{:<4} {} {:<9} {} {}",
            row.seq,
            row.decided_at.to_rfc3339(),
            row.decision,
            hash.short(),
            row.notes.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
