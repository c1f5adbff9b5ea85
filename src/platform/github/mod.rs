mod client;

pub use client::GitHubTrigger;
