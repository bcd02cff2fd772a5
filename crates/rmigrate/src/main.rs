use crate::prelude::*;
use clap::Parser;

mod atlassian;
mod convert;
mod error;
mod prelude;
mod redmine;

#[derive(Debug, clap::Parser)]
#[command(
    author,
    version,
    about,
    long_about = "Export Redmine issues and wikis, then import them into Jira and Confluence"
)]
pub struct App {
    #[command(subcommand)]
    pub command: SubCommands,

    #[clap(flatten)]
    global: Global,
}

#[derive(Debug, Clone, clap::Args)]
pub struct Global {
    /// Whether to display additional information.
    #[clap(long, env = "RMIGRATE_VERBOSE", global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Debug, clap::Parser)]
pub enum SubCommands {
    /// Export issues and wiki pages from Redmine
    #[clap(subcommand)]
    Redmine(crate::redmine::Commands),

    /// Import an exported wiki into Confluence
    #[clap(subcommand)]
    Confluence(crate::atlassian::confluence::Commands),

    /// Import exported issues into Jira
    #[clap(subcommand)]
    Jira(crate::atlassian::jira::Commands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();

    let default_filter = if app.global.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    color_eyre::install()?;

    match app.command {
        SubCommands::Redmine(cmd) => crate::redmine::run(cmd, app.global).await,
        SubCommands::Confluence(cmd) => crate::atlassian::confluence::run(cmd, app.global).await,
        SubCommands::Jira(cmd) => crate::atlassian::jira::run(cmd, app.global).await,
    }
    .map_err(|err: color_eyre::eyre::Report| eyre!(err))
}
