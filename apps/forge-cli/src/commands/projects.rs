use anyhow::Result;
use clap::Args;

use super::util::{display_path, print_json, Context, OutputArgs};

#[derive(Args)]
pub struct ProjectsArgs {
    /// Inspect one project instead of listing all
    #[arg(long)]
    pub name: Option<String>,
    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn run(ctx: &Context, args: ProjectsArgs) -> Result<()> {
    let registry = ctx.registry()?;
    let projects = match &args.name {
        Some(name) => vec![registry.inspect(name)?],
        None => registry.list()?,
    };
    if args.output.json {
        return print_json(&projects, args.output.pretty);
    }
    if projects.is_empty() {
        println!("No projects under {}", display_path(registry.data_dir()));
        return Ok(());
    }
    for p in &projects {
        let entities = match (&p.entity_count, &p.source_error) {
            (Some(n), _) => format!("{n} entities"),
            (None, Some(err)) => format!("source unreadable: {err}"),
            (None, None) => "no source".to_string(),
        };
        let overlay = if p.has_overlay { "overlay" } else { "no overlay" };
        let title = p
            .manifest
            .as_ref()
            .and_then(|m| m.name.as_deref())
            .unwrap_or("");
        println!("{:<20} {:<24} {:<10} {}", p.name, entities, overlay, title);
    }
    Ok(())
}
