//! One stream's search cursor and the step that advances it.
//!
//! A stream cycles through its queries ("rotation"). Each step fetches one
//! page of one query, restricted to issues updated since the stream's
//! watermark. The watermark candidate is taken when a rotation starts and is
//! committed only once the rotation wraps back to the first query and page,
//! so an interrupted rotation is retried from the old watermark.

use crate::config::{ErrorPolicy, SyncConfig};
use crate::error::{Result, SyncError};
use crate::model::{IssueType, RemoteIssue, StreamKind, StreamRecord};
use crate::remote::client::PER_PAGE;
use crate::remote::GitHubClient;
use crate::storage::SqliteStorage;
use crate::sync::events::{EventBus, StreamEvent};
use crate::util::time::{UPDATED_QUALIFIER_LEN, format_timestamp, now_utc};
use crate::util::{join_with_max, parse_api_path};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Search budget for a stream that has no linked issues yet.
pub const FIRST_SYNC_BUDGET: u64 = 100;
/// Search budget per query once a stream has been populated.
pub const MAX_SEARCH_COUNT: u64 = 1000;
/// Maximum length of a search query, including the `updated:` qualifier.
pub const MAX_QUERY_LEN: usize = 256;
const TEAMS_PER_QUERY: usize = 20;

/// How a stream obtains its search queries and narrows the results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStrategy {
    /// User-defined queries stored with the stream.
    Custom,
    /// Issues involving or owned by the authenticated user.
    Me,
    /// Issues mentioning the user's teams.
    Team,
    /// Issues in watched repositories.
    Watching,
    /// Issues subscribed to by id; `ids` is refreshed with the queries.
    Subscription { ids: HashSet<i64> },
}

impl QueryStrategy {
    #[must_use]
    pub fn for_kind(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Custom => Self::Custom,
            StreamKind::Me => Self::Me,
            StreamKind::Team => Self::Team,
            StreamKind::Watching => Self::Watching,
            StreamKind::Subscription => Self::Subscription {
                ids: HashSet::new(),
            },
        }
    }

    /// Keep only results this strategy is interested in.
    #[must_use]
    pub fn filter_results(&self, items: Vec<RemoteIssue>) -> Vec<RemoteIssue> {
        match self {
            Self::Subscription { ids } => items.into_iter().filter(|i| ids.contains(&i.id)).collect(),
            _ => items,
        }
    }
}

/// Whether a stream may search right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Ready,
    /// Stopped after a failure until refreshed.
    Halted,
    /// Skipped until the deadline.
    Backoff { until: Instant },
}

/// What one [`StreamUnit::exec`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Searched {
        query: String,
        page: u32,
        total_count: u64,
        updated_ids: Vec<i64>,
    },
    /// The stream has no queries to run.
    Idle,
    /// Backing off after a failure.
    Skipped,
    Halted,
    /// A remote failure was handled by the error policy.
    Failed,
}

/// Everything a stream step needs from its owner.
pub struct SyncContext<'a> {
    pub storage: &'a mut SqliteStorage,
    pub client: &'a GitHubClient,
    pub config: &'a SyncConfig,
    pub events: &'a EventBus,
}

/// In-memory state of one stream.
#[derive(Debug, Clone)]
pub struct StreamUnit {
    id: i64,
    name: String,
    strategy: QueryStrategy,
    queries: Vec<String>,
    query_index: usize,
    page: u32,
    searched_at: Option<DateTime<Utc>>,
    candidate: Option<DateTime<Utc>>,
    health: StreamHealth,
}

impl StreamUnit {
    /// # Errors
    ///
    /// Returns an error if the record's id is an unknown system stream.
    pub fn from_record(record: &StreamRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            strategy: QueryStrategy::for_kind(record.kind()?),
            queries: record.queries.clone(),
            query_index: 0,
            page: 1,
            searched_at: record.searched_at,
            candidate: None,
            health: StreamHealth::Ready,
        })
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn strategy(&self) -> &QueryStrategy {
        &self.strategy
    }

    /// Queries cached for the current rotation.
    #[must_use]
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    #[must_use]
    pub const fn query_index(&self) -> usize {
        self.query_index
    }

    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    #[must_use]
    pub const fn searched_at(&self) -> Option<DateTime<Utc>> {
        self.searched_at
    }

    #[must_use]
    pub const fn health(&self) -> StreamHealth {
        self.health
    }

    /// Clear a halt or backoff so the next step searches.
    pub fn reset_health(&mut self) {
        self.health = StreamHealth::Ready;
    }

    const fn at_rotation_start(&self) -> bool {
        self.query_index == 0 && self.page == 1
    }

    /// The current query with the watermark qualifier applied.
    #[must_use]
    pub fn effective_query(&self) -> Option<String> {
        let base = self.queries.get(self.query_index)?;
        Some(match &self.searched_at {
            Some(watermark) => format!("{base} updated:>={}", format_timestamp(watermark)),
            None => base.clone(),
        })
    }

    /// Move to the next page, or to the next query once the page budget or
    /// the result count is exhausted.
    pub fn advance(&mut self, total_count: u64, budget: u64) {
        let fetched = u64::from(self.page) * u64::from(PER_PAGE);
        if fetched < budget && fetched < total_count {
            self.page += 1;
        } else {
            self.page = 1;
            self.query_index = (self.query_index + 1) % self.queries.len().max(1);
        }
    }

    /// Run one step.
    ///
    /// # Errors
    ///
    /// Storage failures are returned. Remote failures are handled by the
    /// configured [`ErrorPolicy`] and reported as [`ExecOutcome::Failed`].
    pub async fn exec(&mut self, ctx: &mut SyncContext<'_>) -> Result<ExecOutcome> {
        match self.health {
            StreamHealth::Halted => return Ok(ExecOutcome::Halted),
            StreamHealth::Backoff { until } if Instant::now() < until => {
                return Ok(ExecOutcome::Skipped);
            }
            StreamHealth::Backoff { .. } => self.health = StreamHealth::Ready,
            StreamHealth::Ready => {}
        }

        match self.step(ctx).await {
            Err(err) if err.is_transport() => {
                self.apply_error_policy(ctx.config, &err);
                Ok(ExecOutcome::Failed)
            }
            other => other,
        }
    }

    async fn step(&mut self, ctx: &mut SyncContext<'_>) -> Result<ExecOutcome> {
        if self.at_rotation_start() || self.queries.is_empty() {
            let queries = self.build_queries(ctx).await?;
            if queries != self.queries {
                ctx.storage.update_stream_queries(self.id, &queries)?;
                debug!(stream = self.id, ?queries, "Stream queries rebuilt");
            }
            self.queries = queries;
            self.query_index = 0;
            self.page = 1;
            self.candidate = Some(now_utc());
        }

        let Some(query) = self.effective_query() else {
            return Ok(ExecOutcome::Idle);
        };

        let budget = if ctx.storage.count_stream_links(self.id)? == 0 {
            FIRST_SYNC_BUDGET
        } else {
            MAX_SEARCH_COUNT
        };
        let page = self.page;
        let result = ctx.client.search_issues(&query, page, PER_PAGE).await?;
        let total_count = result.total_count;

        let mut items = self.strategy.filter_results(result.items);
        self.correct_staleness(ctx, &mut items).await?;

        let limits = ctx.config.cache_limits();
        let imported = ctx.storage.import_issues(&items, None, &limits)?;
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        ctx.storage.link_and_reconcile(self.id, &ids)?;
        if !imported.closed_pr_ids.is_empty() {
            self.check_merged(ctx, &imported.closed_pr_ids).await?;
        }

        if !imported.updated_ids.is_empty() {
            info!(
                stream = self.id,
                name = %self.name,
                page,
                total_count,
                updated = imported.updated_ids.len(),
                "updated"
            );
        }
        ctx.events.emit(StreamEvent::StreamUpdated {
            stream_id: self.id,
            updated_ids: imported.updated_ids.clone(),
        });

        self.advance(total_count, budget);
        if self.at_rotation_start() {
            self.commit_watermark(ctx.storage)?;
        }

        Ok(ExecOutcome::Searched {
            query,
            page,
            total_count,
            updated_ids: imported.updated_ids,
        })
    }

    /// Persist the candidate taken at rotation start if it moves the
    /// watermark forward.
    fn commit_watermark(&mut self, storage: &mut SqliteStorage) -> Result<()> {
        let Some(candidate) = self.candidate.take() else {
            return Ok(());
        };
        if self.searched_at.is_some_and(|current| candidate <= current) {
            return Ok(());
        }
        storage.update_searched_at(self.id, &candidate)?;
        self.searched_at = Some(candidate);
        debug!(stream = self.id, searched_at = %format_timestamp(&candidate), "Watermark committed");
        Ok(())
    }

    async fn build_queries(&mut self, ctx: &mut SyncContext<'_>) -> Result<Vec<String>> {
        match &mut self.strategy {
            QueryStrategy::Custom => {
                let record = ctx
                    .storage
                    .get_stream(self.id)?
                    .ok_or(SyncError::StreamNotFound { id: self.id })?;
                Ok(record.queries)
            }
            QueryStrategy::Me => {
                let login = match &ctx.config.login {
                    Some(login) => login.clone(),
                    None => ctx.client.authenticated_user().await?.login,
                };
                Ok(vec![format!("involves:{login}"), format!("user:{login}")])
            }
            QueryStrategy::Team => {
                let teams = ctx.client.user_teams().await?;
                Ok(team_queries(&teams))
            }
            QueryStrategy::Watching => {
                let repos = ctx.client.watched_repos().await?;
                Ok(repo_queries(&repos))
            }
            QueryStrategy::Subscription { ids } => {
                let subscriptions = ctx.storage.list_subscriptions()?;
                *ids = subscriptions.iter().map(|s| s.issue_id).collect();
                let mut seen = HashSet::new();
                let repos: Vec<String> = subscriptions
                    .into_iter()
                    .map(|s| s.repo)
                    .filter(|repo| seen.insert(repo.clone()))
                    .collect();
                Ok(repo_queries(&repos))
            }
        }
    }

    /// Some enterprise hosts report a pull request's issue-side `updated_at`,
    /// which lags behind reviews. Such items would look older than the
    /// watermark; take the cached value for unread rows, otherwise ask the
    /// pulls endpoint.
    async fn correct_staleness(
        &self,
        ctx: &mut SyncContext<'_>,
        items: &mut [RemoteIssue],
    ) -> Result<()> {
        if ctx.config.is_public_github() {
            return Ok(());
        }
        let Some(watermark) = self.searched_at else {
            return Ok(());
        };

        for item in items
            .iter_mut()
            .filter(|i| i.is_pull_request() && i.updated_at < watermark)
        {
            if let Some(cached) = ctx.storage.get_issue(item.id)? {
                if cached.is_unread() {
                    item.updated_at = cached.updated_at;
                    continue;
                }
            }

            let url = item
                .pull_request
                .as_ref()
                .map_or(item.url.as_str(), |pr| pr.url.as_str());
            let Some(path) = parse_api_path(url) else {
                warn!(id = item.id, url, "Cannot locate pull request for staleness check");
                continue;
            };
            match ctx.client.pull_request(&path.repo(), path.number).await {
                Ok(pull) => item.updated_at = pull.updated_at,
                Err(err) => warn!(id = item.id, error = %err, "Staleness check failed"),
            }
            sleep(ctx.config.staleness_delay).await;
        }
        Ok(())
    }

    /// Record merge times for closed pull requests. Skipped on a stream's
    /// first sync, which may hold a long closed history.
    async fn check_merged(&self, ctx: &mut SyncContext<'_>, ids: &[i64]) -> Result<()> {
        if self.searched_at.is_none() {
            return Ok(());
        }
        for issue in ctx.storage.get_issues(ids)? {
            if issue.issue_type != IssueType::Pr {
                continue;
            }
            debug!(repo = %issue.repo, number = issue.number, "Checking merge state");
            match ctx.client.pull_request(&issue.repo, issue.number).await {
                Ok(pull) => {
                    if let Some(merged_at) = pull.merged_at {
                        ctx.storage.update_merged(issue.id, &merged_at)?;
                    }
                }
                Err(err) => {
                    warn!(id = issue.id, error = %err, "Merge check failed");
                    break;
                }
            }
        }
        Ok(())
    }

    fn apply_error_policy(&mut self, config: &SyncConfig, err: &SyncError) {
        match config.error_policy {
            ErrorPolicy::Halt => {
                error!(stream = self.id, name = %self.name, error = %err, "Stream halted");
                self.health = StreamHealth::Halted;
            }
            ErrorPolicy::Backoff => {
                error!(
                    stream = self.id,
                    name = %self.name,
                    error = %err,
                    backoff_secs = config.error_backoff.as_secs_f64(),
                    "Stream backing off"
                );
                self.health = StreamHealth::Backoff {
                    until: Instant::now() + config.error_backoff,
                };
            }
        }
    }
}

/// `team:"org/slug"` terms, a fixed number per query.
#[must_use]
pub fn team_queries(teams: &[String]) -> Vec<String> {
    teams
        .chunks(TEAMS_PER_QUERY)
        .map(|chunk| {
            chunk
                .iter()
                .map(|team| format!("team:\"{team}\""))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// `(repo:a OR repo:b ...)` groups packed so each query leaves room for the
/// `updated:` qualifier.
#[must_use]
pub fn repo_queries(repos: &[String]) -> Vec<String> {
    let terms: Vec<String> = repos.iter().map(|repo| format!("repo:{repo}")).collect();
    join_with_max(&terms, MAX_QUERY_LEN - UPDATED_QUALIFIER_LEN - 2, " OR ")
        .into_iter()
        .map(|group| format!("({group})"))
        .collect()
}
