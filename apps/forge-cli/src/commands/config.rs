use anyhow::Result;
use clap::{Args, Subcommand};
use forge_recon::config::config_schema_json;

use super::util::{print_json, Context};

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Print the JSON Schema of forge.toml
    Schema(PrettyArgs),
    /// Print the effective configuration after defaults and overrides
    Show(PrettyArgs),
}

#[derive(Args)]
pub struct PrettyArgs {
    #[arg(long)]
    pub pretty: bool,
}

pub fn run(ctx: &Context, cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Schema(args) => print_json(&config_schema_json(), args.pretty),
        ConfigCmd::Show(args) => print_json(&ctx.config()?, args.pretty),
    }
}
