pub mod config;
pub mod filter;
pub mod github;
pub mod mailer;
pub mod models;
pub mod orchestrator;
pub mod state;
pub mod template;

pub use config::{Config, RepoSettings};
pub use filter::filter_unseen;
pub use github::{GitHubClient, PullSource};
pub use mailer::{Email, Mailer, SendmailMailer};
pub use models::{grouped_payload, PullRequest, Status};
pub use orchestrator::{Orchestrator, RunSummary};
pub use state::{SeenSet, StateError};
