use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "clincase")]
#[command(about = "ClinCase - Multi-Tenant Clinical Decision Platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the resolved configuration (secrets redacted)
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}
