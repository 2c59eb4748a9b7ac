use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use forge_recon::{BookmarkDraft, NarrativeDraft, OverlayView, PersonaDraft};

use super::util::{print_json, Context, OutputArgs};

#[derive(Subcommand)]
pub enum PersonasCmd {
    /// List personas with drift warnings
    List(OverlayListArgs),
    /// Show one persona
    Show(OverlayEntityArgs),
    /// Create or replace the persona of an entity
    Set(PersonaSetArgs),
    /// Delete the persona of an entity
    Delete(OverlayEntityArgs),
}

#[derive(Subcommand)]
pub enum BookmarksCmd {
    /// List bookmarks with drift warnings
    List(OverlayListArgs),
    /// Show one bookmark
    Show(OverlayEntityArgs),
    /// Create or replace the bookmark of an entity
    Set(BookmarkSetArgs),
    /// Delete the bookmark of an entity
    Delete(OverlayEntityArgs),
}

#[derive(Subcommand)]
pub enum NarrativesCmd {
    /// List narrative contexts by title
    List(OverlayListArgs),
    /// Show one narrative context
    Show(NarrativeIdArgs),
    /// Create or replace a narrative context
    Set(NarrativeSetArgs),
    /// Delete a narrative context
    Delete(NarrativeIdArgs),
}

#[derive(Args)]
pub struct OverlayListArgs {
    pub project: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct OverlayEntityArgs {
    pub project: String,
    pub entity_id: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct PersonaSetArgs {
    pub project: String,
    pub entity_id: String,
    #[arg(long)]
    pub prompt: String,
    /// Comma-separated goals
    #[arg(long)]
    pub goals: Option<String>,
    /// Comma-separated capabilities
    #[arg(long)]
    pub capabilities: Option<String>,
    /// Free-form state as JSON
    #[arg(long)]
    pub state: Option<String>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct BookmarkSetArgs {
    pub project: String,
    pub entity_id: String,
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub elevation: Option<f64>,
    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct NarrativeIdArgs {
    pub project: String,
    pub context_id: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct NarrativeSetArgs {
    pub project: String,
    pub context_id: String,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub mood: Option<String>,
    #[arg(long)]
    pub timeline: Option<String>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct PromotableArgs {
    pub project: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

fn warning_suffix<T>(view: &OverlayView<T>) -> String {
    view.warning
        .as_ref()
        .map(|w| format!("  [!] {w}"))
        .unwrap_or_default()
}

pub fn personas(ctx: &Context, cmd: PersonasCmd) -> Result<()> {
    match cmd {
        PersonasCmd::List(args) => {
            let project = ctx.project(&args.project)?;
            let list = project.personas()?;
            if args.output.json {
                return print_json(&list, args.output.pretty);
            }
            for view in &list {
                println!(
                    "{:<16} {}{}",
                    view.record.entity_id,
                    view.record.persona_prompt,
                    warning_suffix(view)
                );
            }
            Ok(())
        }
        PersonasCmd::Show(args) => {
            let project = ctx.project(&args.project)?;
            let view = project
                .persona(&args.entity_id)?
                .with_context(|| format!("no persona for '{}'", args.entity_id))?;
            if args.output.json {
                return print_json(&view, args.output.pretty);
            }
            println!("{}{}", view.record.entity_id, warning_suffix(&view));
            println!("prompt        {}", view.record.persona_prompt);
            println!("goals         {}", view.record.goals.as_deref().unwrap_or("-"));
            println!("capabilities  {}", view.record.capabilities.as_deref().unwrap_or("-"));
            println!("state         {}", view.record.state);
            Ok(())
        }
        PersonasCmd::Set(args) => {
            let project = ctx.project(&args.project)?;
            let state = args
                .state
                .as_deref()
                .map(|s| serde_json::from_str::<serde_json::Value>(s))
                .transpose()
                .context("--state must be valid JSON")?;
            let draft = PersonaDraft {
                entity_id: args.entity_id,
                persona_prompt: args.prompt,
                goals: args.goals,
                capabilities: args.capabilities,
                state,
            };
            let view = project.save_persona(&draft)?;
            if args.output.json {
                return print_json(&view, args.output.pretty);
            }
            println!("saved persona for {}{}", view.record.entity_id, warning_suffix(&view));
            Ok(())
        }
        PersonasCmd::Delete(args) => {
            let project = ctx.project(&args.project)?;
            let deleted = project.delete_persona(&args.entity_id)?;
            if args.output.json {
                return print_json(&serde_json::json!({ "deleted": deleted }), args.output.pretty);
            }
            println!("{}", if deleted { "deleted" } else { "not found" });
            Ok(())
        }
    }
}

pub fn bookmarks(ctx: &Context, cmd: BookmarksCmd) -> Result<()> {
    let fmt_coord = |v: Option<f64>| v.map(|x| format!("{x:.5}")).unwrap_or_else(|| "-".into());
    match cmd {
        BookmarksCmd::List(args) => {
            let project = ctx.project(&args.project)?;
            let list = project.bookmarks()?;
            if args.output.json {
                return print_json(&list, args.output.pretty);
            }
            for view in &list {
                let b = &view.record;
                println!(
                    "{:<16} {:>10} {:>11} {}{}",
                    b.entity_id,
                    fmt_coord(b.latitude),
                    fmt_coord(b.longitude),
                    b.tags.join(","),
                    warning_suffix(view)
                );
            }
            Ok(())
        }
        BookmarksCmd::Show(args) => {
            let project = ctx.project(&args.project)?;
            let view = project
                .bookmark(&args.entity_id)?
                .with_context(|| format!("no bookmark for '{}'", args.entity_id))?;
            if args.output.json {
                return print_json(&view, args.output.pretty);
            }
            let b = &view.record;
            println!("{}{}", b.entity_id, warning_suffix(&view));
            println!("lat/lon    {} {}", fmt_coord(b.latitude), fmt_coord(b.longitude));
            println!("elevation  {}", fmt_coord(b.elevation));
            println!("tags       {}", b.tags.join(","));
            Ok(())
        }
        BookmarksCmd::Set(args) => {
            let project = ctx.project(&args.project)?;
            let draft = BookmarkDraft {
                entity_id: args.entity_id,
                latitude: args.lat,
                longitude: args.lon,
                elevation: args.elevation,
                tags: args
                    .tags
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
            };
            let view = project.save_bookmark(&draft)?;
            if args.output.json {
                return print_json(&view, args.output.pretty);
            }
            println!("saved bookmark for {}{}", view.record.entity_id, warning_suffix(&view));
            Ok(())
        }
        BookmarksCmd::Delete(args) => {
            let project = ctx.project(&args.project)?;
            let deleted = project.delete_bookmark(&args.entity_id)?;
            if args.output.json {
                return print_json(&serde_json::json!({ "deleted": deleted }), args.output.pretty);
            }
            println!("{}", if deleted { "deleted" } else { "not found" });
            Ok(())
        }
    }
}

pub fn narratives(ctx: &Context, cmd: NarrativesCmd) -> Result<()> {
    match cmd {
        NarrativesCmd::List(args) => {
            let project = ctx.project(&args.project)?;
            let list = project.narratives()?;
            if args.output.json {
                return print_json(&list, args.output.pretty);
            }
            for n in &list {
                println!("{:<16} {:<24} {}", n.context_id, n.title, n.mood.as_deref().unwrap_or("-"));
            }
            Ok(())
        }
        NarrativesCmd::Show(args) => {
            let project = ctx.project(&args.project)?;
            let n = project
                .narrative(&args.context_id)?
                .with_context(|| format!("no narrative context '{}'", args.context_id))?;
            if args.output.json {
                return print_json(&n, args.output.pretty);
            }
            println!("{}  {}", n.context_id, n.title);
            println!("mood         {}", n.mood.as_deref().unwrap_or("-"));
            println!("timeline     {}", n.timeline.as_deref().unwrap_or("-"));
            println!("description  {}", n.description.as_deref().unwrap_or("-"));
            Ok(())
        }
        NarrativesCmd::Set(args) => {
            let project = ctx.project(&args.project)?;
            let saved = project.save_narrative(&NarrativeDraft {
                context_id: args.context_id,
                title: args.title,
                description: args.description,
                mood: args.mood,
                timeline: args.timeline,
            })?;
            if args.output.json {
                return print_json(&saved, args.output.pretty);
            }
            println!("saved narrative context {}", saved.context_id);
            Ok(())
        }
        NarrativesCmd::Delete(args) => {
            let project = ctx.project(&args.project)?;
            let deleted = project.delete_narrative(&args.context_id)?;
            if args.output.json {
                return print_json(&serde_json::json!({ "deleted": deleted }), args.output.pretty);
            }
            println!("{}", if deleted { "deleted" } else { "not found" });
            Ok(())
        }
    }
}

pub fn promotable(ctx: &Context, args: PromotableArgs) -> Result<()> {
    let project = ctx.project(&args.project)?;
    let entities = project.promotable_entities()?;
    if args.output.json {
        return print_json(&entities, args.output.pretty);
    }
    for e in &entities {
        println!("{:<16} {:<14} {}", e.id, e.kind, e.label);
    }
    Ok(())
}
