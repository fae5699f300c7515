use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::version::{compare_versions, VersionOrder};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";

/// Env overrides so tests can point the client at a mock server.
pub const API_BASE_ENV: &str = "WFAUDIT_API_BASE_URL";
pub const RAW_BASE_ENV: &str = "WFAUDIT_RAW_BASE_URL";

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;

/// Failure taxonomy of the fetch layer. Only `Transient` is retried;
/// `RateLimited` surfaces after the blocking wait gave up at the deadline.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limit exhausted fetching {0}")]
    RateLimited(String),
    #[error("transient error fetching {0}: {1}")]
    Transient(String, String),
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub commit_sha: Option<String>,
}

/// Capability seam over remote metadata. The resolver and the async checks
/// only ever see this trait, so transports are interchangeable.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Raw bytes of one definition file at a specific ref.
    async fn fetch_definition(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> FetchResult<String>;

    /// Workflow file paths under `.github/workflows` for a repository.
    async fn list_definitions(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> FetchResult<Vec<String>>;

    /// Highest version-ordered tag, `None` when the repo has no
    /// version-shaped tags.
    async fn fetch_latest_tag(&self, owner: &str, repo: &str) -> FetchResult<Option<TagInfo>>;

    /// Committer date for a commit, `None` when the commit is unknown.
    async fn fetch_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> FetchResult<Option<DateTime<Utc>>>;
}

// ---------------------------------------------------------------------------
// Rate budget
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BudgetState {
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
}

/// Shared rate-limit budget, tracked from `x-ratelimit-*` and `Retry-After`
/// response headers.
/// Safe under concurrent access; at-most-stale-by-one-fetch races are
/// acceptable (a wasted call, never corruption).
#[derive(Debug, Default)]
pub struct RateBudget {
    state: Mutex<BudgetState>,
}

impl RateBudget {
    pub async fn record(&self, remaining: Option<u64>, reset_epoch: Option<i64>) {
        let mut state = self.state.lock().await;
        if remaining.is_some() {
            state.remaining = remaining;
        }
        if let Some(epoch) = reset_epoch {
            state.reset_at = Utc.timestamp_opt(epoch, 0).single();
        }
    }

    /// Seconds to wait before the next call may proceed; zero when budget
    /// remains or the reset time is unknown or already past.
    pub async fn wait_seconds(&self, now: DateTime<Utc>) -> u64 {
        let state = self.state.lock().await;
        if state.remaining != Some(0) {
            return 0;
        }
        match state.reset_at {
            Some(reset) if reset > now => (reset - now).num_seconds().max(0) as u64 + 1,
            _ => 0,
        }
    }

    pub async fn is_exhausted(&self) -> bool {
        self.state.lock().await.remaining == Some(0)
    }
}

// ---------------------------------------------------------------------------
// GitHub transport
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ContentsEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    commit: Option<TagCommit>,
}

#[derive(Deserialize)]
struct TagCommit {
    sha: String,
}

/// GitHub-backed [`Fetcher`]: REST for listings/tags/commits, raw content
/// host for definition bytes. Rate-limited, retrying.
#[derive(Clone)]
pub struct GitHubFetcher {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    raw_base: String,
    budget: Arc<RateBudget>,
    /// Hard stop for rate-limit waits; when absent, waits are unbounded.
    deadline: Option<Instant>,
}

impl GitHubFetcher {
    pub fn new(token: Option<String>) -> Self {
        let api_base =
            std::env::var(API_BASE_ENV).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let raw_base =
            std::env::var(RAW_BASE_ENV).unwrap_or_else(|_| DEFAULT_RAW_BASE.to_string());
        Self::with_bases(token, api_base, raw_base)
    }

    /// Explicit endpoints, bypassing the env overrides.
    pub fn with_bases(
        token: Option<String>,
        api_base: impl Into<String>,
        raw_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("wfaudit")
                .build()
                .expect("failed to build HTTP client"),
            token,
            api_base: api_base.into(),
            raw_base: raw_base.into(),
            budget: Arc::new(RateBudget::default()),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn budget(&self) -> Arc<RateBudget> {
        Arc::clone(&self.budget)
    }

    /// Block while the shared budget is exhausted, up to the deadline.
    async fn await_budget(&self, url: &str) -> FetchResult<()> {
        loop {
            let wait = self.budget.wait_seconds(Utc::now()).await;
            if wait == 0 {
                return Ok(());
            }
            let wait = tokio::time::Duration::from_secs(wait);
            match self.deadline {
                Some(deadline) if Instant::now() + wait >= deadline => {
                    return Err(FetchError::RateLimited(url.to_string()));
                }
                _ => {
                    debug!(url, wait_secs = wait.as_secs(), "rate budget exhausted, waiting for reset");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn get(&self, url: &str) -> FetchResult<reqwest::Response> {
        self.await_budget(url).await?;

        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(url.to_string(), e.to_string()))?;

        let remaining = header_u64(&response, "x-ratelimit-remaining");
        let reset = header_u64(&response, "x-ratelimit-reset").map(|v| v as i64);
        let retry_after = header_u64(&response, "retry-after");
        self.budget.record(remaining, reset).await;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized(url.to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (status == reqwest::StatusCode::FORBIDDEN
                && (remaining == Some(0) || retry_after.is_some()))
        {
            // Secondary limits advertise Retry-After without the
            // x-ratelimit headers; fold it into the shared budget so the
            // next attempt blocks until the server-named reset (bounded by
            // the deadline in await_budget).
            if let Some(secs) = retry_after {
                self.budget
                    .record(Some(0), Some(Utc::now().timestamp() + secs as i64))
                    .await;
            }
            return Err(FetchError::RateLimited(url.to_string()));
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(url.to_string()));
        }
        Err(FetchError::Transient(
            url.to_string(),
            format!("HTTP {status}"),
        ))
    }

    /// Bounded exponential backoff around `get`. `Transient` is retried,
    /// `RateLimited` is retried once more so a budget reset can take effect,
    /// `NotFound`/`Unauthorized` are not retried.
    async fn get_with_retry(&self, url: &str) -> FetchResult<reqwest::Response> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff =
                    tokio::time::Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }
            match self.get(url).await {
                Ok(response) => return Ok(response),
                Err(e @ (FetchError::NotFound(_) | FetchError::Unauthorized(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt"))
    }

    async fn get_json(&self, url: &str) -> FetchResult<serde_json::Value> {
        let response = self.get_with_retry(url).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::Transient(url.to_string(), e.to_string()))
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[async_trait]
impl Fetcher for GitHubFetcher {
    #[instrument(skip(self))]
    async fn fetch_definition(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> FetchResult<String> {
        let url = format!("{}/{owner}/{repo}/{git_ref}/{path}", self.raw_base);
        let response = self.get_with_retry(&url).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::Transient(url, e.to_string()))
    }

    #[instrument(skip(self))]
    async fn list_definitions(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> FetchResult<Vec<String>> {
        let url = format!(
            "{}/repos/{owner}/{repo}/contents/.github/workflows?ref={git_ref}",
            self.api_base
        );
        let json = self.get_json(&url).await?;
        let entries: Vec<ContentsEntry> = serde_json::from_value(json)
            .map_err(|e| FetchError::Transient(url.clone(), e.to_string()))?;
        Ok(entries
            .into_iter()
            .filter(|e| {
                e.entry_type == "file" && (e.path.ends_with(".yml") || e.path.ends_with(".yaml"))
            })
            .map(|e| e.path)
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_latest_tag(&self, owner: &str, repo: &str) -> FetchResult<Option<TagInfo>> {
        let url = format!("{}/repos/{owner}/{repo}/tags?per_page=100", self.api_base);
        let json = match self.get_json(&url).await {
            Ok(json) => json,
            Err(FetchError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let entries: Vec<TagEntry> = serde_json::from_value(json)
            .map_err(|e| FetchError::Transient(url, e.to_string()))?;
        Ok(pick_latest_tag(entries))
    }

    #[instrument(skip(self))]
    async fn fetch_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> FetchResult<Option<DateTime<Utc>>> {
        let url = format!("{}/repos/{owner}/{repo}/commits/{sha}", self.api_base);
        let json = match self.get_json(&url).await {
            Ok(json) => json,
            Err(FetchError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let date = json
            .get("commit")
            .and_then(|c| c.get("committer"))
            .and_then(|c| c.get("date"))
            .and_then(|d| d.as_str())
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        Ok(date)
    }
}

fn pick_latest_tag(entries: Vec<TagEntry>) -> Option<TagInfo> {
    let mut best: Option<TagEntry> = None;
    for entry in entries {
        match &best {
            None => {
                if entry.name.trim_start_matches('v').starts_with(|c: char| c.is_ascii_digit()) {
                    best = Some(entry);
                }
            }
            Some(current) => {
                if compare_versions(&entry.name, &current.name) == VersionOrder::Greater {
                    best = Some(entry);
                }
            }
        }
    }
    best.map(|entry| TagInfo {
        commit_sha: entry.commit.map(|c| c.sha),
        name: entry.name,
    })
}

// ---------------------------------------------------------------------------
// Run-lifetime cache
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Cached<T> {
    Hit(T),
    Missing,
}

/// Decorator that serves identical requests from an in-memory map for the
/// lifetime of one resolution run. Successful results and `NotFound` are
/// cached; `Transient`/`RateLimited` are not, so a later retry can succeed.
pub struct CachedFetcher {
    inner: Arc<dyn Fetcher>,
    definitions: Mutex<HashMap<String, Cached<String>>>,
    listings: Mutex<HashMap<String, Cached<Vec<String>>>>,
    tags: Mutex<HashMap<String, Option<TagInfo>>>,
    commit_dates: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
}

impl CachedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self {
            inner,
            definitions: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            commit_dates: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Fetcher for CachedFetcher {
    async fn fetch_definition(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> FetchResult<String> {
        let key = format!("{owner}/{repo}@{git_ref}:{path}").to_ascii_lowercase();
        if let Some(cached) = self.definitions.lock().await.get(&key).cloned() {
            return match cached {
                Cached::Hit(body) => Ok(body),
                Cached::Missing => Err(FetchError::NotFound(key)),
            };
        }
        match self.inner.fetch_definition(owner, repo, git_ref, path).await {
            Ok(body) => {
                self.definitions
                    .lock()
                    .await
                    .insert(key, Cached::Hit(body.clone()));
                Ok(body)
            }
            Err(FetchError::NotFound(url)) => {
                self.definitions.lock().await.insert(key, Cached::Missing);
                Err(FetchError::NotFound(url))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_definitions(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> FetchResult<Vec<String>> {
        let key = format!("{owner}/{repo}@{git_ref}").to_ascii_lowercase();
        if let Some(cached) = self.listings.lock().await.get(&key).cloned() {
            return match cached {
                Cached::Hit(paths) => Ok(paths),
                Cached::Missing => Err(FetchError::NotFound(key)),
            };
        }
        match self.inner.list_definitions(owner, repo, git_ref).await {
            Ok(paths) => {
                self.listings
                    .lock()
                    .await
                    .insert(key, Cached::Hit(paths.clone()));
                Ok(paths)
            }
            Err(FetchError::NotFound(url)) => {
                self.listings.lock().await.insert(key, Cached::Missing);
                Err(FetchError::NotFound(url))
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_latest_tag(&self, owner: &str, repo: &str) -> FetchResult<Option<TagInfo>> {
        let key = format!("{owner}/{repo}").to_ascii_lowercase();
        if let Some(cached) = self.tags.lock().await.get(&key).cloned() {
            return Ok(cached);
        }
        let result = self.inner.fetch_latest_tag(owner, repo).await?;
        self.tags.lock().await.insert(key, result.clone());
        Ok(result)
    }

    async fn fetch_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> FetchResult<Option<DateTime<Utc>>> {
        let key = format!("{owner}/{repo}@{sha}").to_ascii_lowercase();
        if let Some(cached) = self.commit_dates.lock().await.get(&key).copied() {
            return Ok(cached);
        }
        let result = self.inner.fetch_commit_date(owner, repo, sha).await?;
        self.commit_dates.lock().await.insert(key, result);
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Filesystem transport
// ---------------------------------------------------------------------------

/// Filesystem-backed [`Fetcher`] for auditing a local checkout. Requests for
/// the origin repository are served from disk; anything else is delegated to
/// the optional remote fetcher or reported as `NotFound`.
pub struct LocalFetcher {
    root: PathBuf,
    owner: String,
    repo: String,
    remote: Option<Arc<dyn Fetcher>>,
}

impl LocalFetcher {
    pub fn new(
        root: PathBuf,
        owner: impl Into<String>,
        repo: impl Into<String>,
        remote: Option<Arc<dyn Fetcher>>,
    ) -> Self {
        Self {
            root,
            owner: owner.into().to_ascii_lowercase(),
            repo: repo.into().to_ascii_lowercase(),
            remote,
        }
    }

    fn is_origin(&self, owner: &str, repo: &str) -> bool {
        owner.eq_ignore_ascii_case(&self.owner) && repo.eq_ignore_ascii_case(&self.repo)
    }

    fn remote(&self, what: &str) -> FetchResult<&Arc<dyn Fetcher>> {
        self.remote
            .as_ref()
            .ok_or_else(|| FetchError::NotFound(format!("{what} (no remote transport configured)")))
    }
}

#[async_trait]
impl Fetcher for LocalFetcher {
    async fn fetch_definition(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> FetchResult<String> {
        if !self.is_origin(owner, repo) {
            return self
                .remote(&format!("{owner}/{repo}@{git_ref}/{path}"))?
                .fetch_definition(owner, repo, git_ref, path)
                .await;
        }
        let full = self.root.join(path);
        std::fs::read_to_string(&full)
            .map_err(|_| FetchError::NotFound(full.display().to_string()))
    }

    async fn list_definitions(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> FetchResult<Vec<String>> {
        if !self.is_origin(owner, repo) {
            return self
                .remote(&format!("{owner}/{repo}@{git_ref}"))?
                .list_definitions(owner, repo, git_ref)
                .await;
        }
        let dir = self.root.join(".github/workflows");
        let entries = std::fs::read_dir(&dir)
            .map_err(|_| FetchError::NotFound(dir.display().to_string()))?;
        let mut paths: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                (name.ends_with(".yml") || name.ends_with(".yaml"))
                    .then(|| format!(".github/workflows/{name}"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn fetch_latest_tag(&self, owner: &str, repo: &str) -> FetchResult<Option<TagInfo>> {
        if self.is_origin(owner, repo) {
            return Ok(None);
        }
        match &self.remote {
            Some(remote) => remote.fetch_latest_tag(owner, repo).await,
            None => Ok(None),
        }
    }

    async fn fetch_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> FetchResult<Option<DateTime<Utc>>> {
        if self.is_origin(owner, repo) {
            return Ok(None);
        }
        match &self.remote {
            Some(remote) => remote.fetch_commit_date(owner, repo, sha).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn budget_allows_calls_when_unknown() {
        let budget = RateBudget::default();
        assert_eq!(budget.wait_seconds(Utc::now()).await, 0);
        assert!(!budget.is_exhausted().await);
    }

    #[tokio::test]
    async fn budget_blocks_when_exhausted_until_reset() {
        let budget = RateBudget::default();
        let now = Utc::now();
        budget.record(Some(0), Some((now.timestamp()) + 30)).await;
        assert!(budget.is_exhausted().await);
        let wait = budget.wait_seconds(now).await;
        assert!((29..=31).contains(&wait), "wait was {wait}");
    }

    #[tokio::test]
    async fn budget_clears_after_reset_passes() {
        let budget = RateBudget::default();
        let now = Utc::now();
        budget.record(Some(0), Some(now.timestamp() - 10)).await;
        assert_eq!(budget.wait_seconds(now).await, 0);
    }

    #[tokio::test]
    async fn budget_with_remaining_never_waits() {
        let budget = RateBudget::default();
        budget.record(Some(50), Some(Utc::now().timestamp() + 600)).await;
        assert_eq!(budget.wait_seconds(Utc::now()).await, 0);
    }

    #[test]
    fn pick_latest_tag_orders_numerically() {
        let entries = vec![
            TagEntry { name: "v2.1".into(), commit: None },
            TagEntry {
                name: "v10.0".into(),
                commit: Some(TagCommit { sha: "abc".into() }),
            },
            TagEntry { name: "v9".into(), commit: None },
        ];
        let best = pick_latest_tag(entries).unwrap();
        assert_eq!(best.name, "v10.0");
        assert_eq!(best.commit_sha.as_deref(), Some("abc"));
    }

    #[test]
    fn pick_latest_tag_ignores_non_version_tags() {
        let entries = vec![
            TagEntry { name: "nightly".into(), commit: None },
            TagEntry { name: "latest".into(), commit: None },
        ];
        assert!(pick_latest_tag(entries).is_none());
    }

    #[test]
    fn pick_latest_tag_empty() {
        assert!(pick_latest_tag(vec![]).is_none());
    }

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch_definition(
            &self,
            _owner: &str,
            _repo: &str,
            _git_ref: &str,
            path: &str,
        ) -> FetchResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path == "missing.yml" {
                return Err(FetchError::NotFound(path.to_string()));
            }
            Ok("jobs: {}".to_string())
        }

        async fn list_definitions(
            &self,
            _owner: &str,
            _repo: &str,
            _git_ref: &str,
        ) -> FetchResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![".github/workflows/ci.yml".to_string()])
        }

        async fn fetch_latest_tag(
            &self,
            _owner: &str,
            _repo: &str,
        ) -> FetchResult<Option<TagInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(TagInfo { name: "v4".into(), commit_sha: None }))
        }

        async fn fetch_commit_date(
            &self,
            _owner: &str,
            _repo: &str,
            _sha: &str,
        ) -> FetchResult<Option<DateTime<Utc>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn counting_cached() -> (Arc<CountingFetcher>, CachedFetcher) {
        let inner = Arc::new(CountingFetcher { calls: AtomicUsize::new(0) });
        let cached = CachedFetcher::new(inner.clone() as Arc<dyn Fetcher>);
        (inner, cached)
    }

    #[tokio::test]
    async fn cache_serves_repeat_definition_fetches() {
        let (inner, cached) = counting_cached();
        for _ in 0..3 {
            cached
                .fetch_definition("o", "r", "v1", "action.yml")
                .await
                .unwrap();
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_key_is_case_insensitive() {
        let (inner, cached) = counting_cached();
        cached.fetch_definition("Org", "Repo", "v1", "action.yml").await.unwrap();
        cached.fetch_definition("org", "repo", "v1", "action.yml").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_remembers_not_found() {
        let (inner, cached) = counting_cached();
        for _ in 0..2 {
            let err = cached
                .fetch_definition("o", "r", "v1", "missing.yml")
                .await
                .unwrap_err();
            assert!(matches!(err, FetchError::NotFound(_)));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_covers_tags_and_commit_dates() {
        let (inner, cached) = counting_cached();
        cached.fetch_latest_tag("o", "r").await.unwrap();
        cached.fetch_latest_tag("o", "r").await.unwrap();
        cached.fetch_commit_date("o", "r", "abc").await.unwrap();
        cached.fetch_commit_date("o", "r", "abc").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_after_header_exhausts_the_budget() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/tool/tags"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3600"))
            .mount(&server)
            .await;

        let fetcher = GitHubFetcher::with_bases(None, server.uri(), server.uri())
            .with_deadline(Instant::now() + tokio::time::Duration::from_secs(2));
        let err = fetcher.fetch_latest_tag("acme", "tool").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(_)), "got {err:?}");
        assert!(fetcher.budget().is_exhausted().await);
    }

    #[tokio::test]
    async fn secondary_limit_forbidden_is_rate_limited_not_unauthorized() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/tool/tags"))
            .respond_with(ResponseTemplate::new(403).insert_header("retry-after", "120"))
            .mount(&server)
            .await;

        let fetcher = GitHubFetcher::with_bases(None, server.uri(), server.uri())
            .with_deadline(Instant::now() + tokio::time::Duration::from_secs(2));
        let err = fetcher.fetch_latest_tag("acme", "tool").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn local_fetcher_reads_workflows_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let wf_dir = dir.path().join(".github/workflows");
        std::fs::create_dir_all(&wf_dir).unwrap();
        std::fs::write(wf_dir.join("ci.yml"), "jobs: {}\n").unwrap();
        std::fs::write(wf_dir.join("notes.txt"), "not yaml").unwrap();

        let fetcher = LocalFetcher::new(dir.path().to_path_buf(), "local", "repo", None);
        let paths = fetcher.list_definitions("local", "repo", "HEAD").await.unwrap();
        assert_eq!(paths, vec![".github/workflows/ci.yml"]);

        let body = fetcher
            .fetch_definition("local", "repo", "HEAD", ".github/workflows/ci.yml")
            .await
            .unwrap();
        assert_eq!(body, "jobs: {}\n");
    }

    #[tokio::test]
    async fn local_fetcher_without_remote_reports_not_found_for_others() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = LocalFetcher::new(dir.path().to_path_buf(), "local", "repo", None);
        let err = fetcher
            .fetch_definition("actions", "checkout", "v4", "action.yml")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
        assert!(fetcher.fetch_latest_tag("actions", "checkout").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_fetcher_missing_workflow_dir_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = LocalFetcher::new(dir.path().to_path_buf(), "local", "repo", None);
        let err = fetcher.list_definitions("local", "repo", "HEAD").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }
}
