use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use sirha::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "SIRHA",
    about = "Run the SIRHA schedule-change request service or walk through a demo",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Drive a seeded campus through the request lifecycle and print the results
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Seconds between background sweeps that expire overdue requests (0 disables)
    #[arg(long, default_value_t = 300)]
    pub(crate) sweep_interval_secs: u64,
    /// Start with the demo catalog loaded instead of an empty campus
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            sweep_interval_secs: 300,
            seed_demo: false,
        }
    }
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
    }
}
