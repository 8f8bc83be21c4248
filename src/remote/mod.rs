//! Remote API access: the rate-limited request pipeline and the GitHub client.

pub mod client;
pub mod pipeline;

pub use client::{GitHubClient, HttpTransport, RawResponse, Transport};
pub use pipeline::{Lane, RateLimit, RateLimitGate, RequestPipeline};
