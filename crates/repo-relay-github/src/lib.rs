//! GitHub boundary for the repo-relay bot.
//!
//! Holds the webhook payload model, the capability trait the relay engine
//! consumes, a reqwest-backed REST client implementing it, and webhook
//! delivery signature verification.

pub mod capabilities;
pub mod github_api_client;
pub mod transport_helpers;
pub mod webhook_payload;
pub mod webhook_signature;

pub use capabilities::{CreatedIssue, GithubCapabilities, RepoRef, RepositoryVisibility};
pub use github_api_client::{GithubApiClient, GithubApiClientConfig};
pub use webhook_payload::{
    GithubIssue, GithubIssueComment, GithubLabel, GithubRepository, GithubUser,
    GithubWebhookEventKind, GithubWebhookPayload,
};
pub use webhook_signature::verify_github_sha256_signature;
