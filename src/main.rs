use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pull_request_bot::{Config, GitHubClient, Orchestrator, SendmailMailer};

#[derive(Parser)]
#[command(name = "pull-request-bot")]
#[command(about = "Emails maintainers when pull requests open or close on watched repositories")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,

    /// GitHub API token (optional for public repositories)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to the sendmail binary used for delivery
    #[arg(long, default_value = "/usr/sbin/sendmail")]
    sendmail: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("pull_request_bot=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let source = GitHubClient::new(cli.token);
    let mailer = SendmailMailer::new(cli.sendmail);
    let orchestrator = Orchestrator::new(source, mailer);

    let summary = orchestrator.run(&config.repositories).await;

    println!(
        "Sent {} notification(s), {} failure(s)",
        summary.notifications_sent, summary.failures
    );

    if summary.failures > 0 {
        std::process::exit(1);
    }

    Ok(())
}
