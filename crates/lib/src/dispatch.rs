//! Dispatcher: authorize, route, resolve, execute and render one inbound request.
//!
//! Splits into [`Dispatcher::prepare`] (cheap, no process spawned) and
//! [`Dispatcher::run`] (waits on the engine) so the caller can send the
//! "running" notice in between.

use std::sync::Arc;

use base64::Engine as _;

use crate::auth::{AllowList, Principal};
use crate::channels::InboundKind;
use crate::disk::DiskRecord;
use crate::error::{RelayError, RequestSource};
use crate::exec::{Executor, Job};
use crate::output::{normalize, truncate_to_budget, ExecutionResult};
use crate::router::{route_callback, route_text, route_web_app, Route, Selector};

/// Keyboard attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    None,
    /// Inline keyboard: control panel button plus one button per quick action.
    Actions,
    /// Persistent reply keyboard whose labels are typed back as text.
    QuickKeys,
    /// Single web-app button opening the disk visualization at this URL.
    Visualize(String),
}

/// Outbound message. `text` is Telegram HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub markup: Markup,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: escape_html(&text.into()),
            markup: Markup::None,
        }
    }

    fn error(err: &RelayError) -> Self {
        Self::plain(err.user_message())
    }
}

/// Result of the cheap first half of request handling.
#[derive(Debug)]
pub enum Prepared {
    /// Answer right away (rejection, welcome, menu).
    Reply(Reply),
    /// Authorized job that needs the engine.
    Job { job: Job, source: RequestSource },
}

/// Request handler shared by every inbound channel. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    allow_list: Arc<AllowList>,
    executor: Executor,
    webapp_url: Arc<str>,
}

impl Dispatcher {
    pub fn new(allow_list: Arc<AllowList>, executor: Executor, webapp_url: impl Into<String>) -> Self {
        let webapp_url: String = webapp_url.into();
        Self {
            allow_list,
            executor,
            webapp_url: Arc::from(webapp_url),
        }
    }

    /// Authorize and route. Nothing is executed here except the local IP probe for `/start`.
    pub async fn prepare(&self, principal: Principal, kind: &InboundKind) -> Prepared {
        if let Err(e) = self.allow_list.authorize(principal) {
            return Prepared::Reply(Reply::error(&e));
        }
        let source = kind.source();
        let route = match kind {
            InboundKind::Text(text) => route_text(text),
            InboundKind::Callback { data, .. } => route_callback(data),
            InboundKind::WebApp(data) => route_web_app(data),
        };
        let route = match route {
            Ok(r) => r,
            Err(e) => {
                log::debug!("rejected request from {}: {}", principal, e);
                return Prepared::Reply(Reply::error(&e));
            }
        };
        match route {
            Route::Start => Prepared::Reply(self.welcome(principal).await),
            Route::Menu => Prepared::Reply(Reply {
                text: "Choose an action:".to_string(),
                markup: match source {
                    RequestSource::Text => Markup::QuickKeys,
                    _ => Markup::Actions,
                },
            }),
            Route::Run(selector) => match self.job_for(principal, selector, source) {
                Ok(job) => Prepared::Job { job, source },
                Err(e) => Prepared::Reply(Reply::error(&e)),
            },
        }
    }

    fn job_for(&self, principal: Principal, selector: Selector, source: RequestSource) -> Result<Job, RelayError> {
        match selector {
            Selector::Catalog(key) => {
                let invocation = self.executor.catalog().resolve(key).ok_or_else(|| {
                    RelayError::UnknownCommand {
                        origin: source,
                        selector: key.to_string(),
                    }
                })?;
                Ok(Job::new(principal, Some(key), invocation))
            }
            Selector::Custom(cmd) => {
                log::info!("principal {} running custom command {:?}", principal, cmd);
                Ok(Job::new(principal, None, cmd))
            }
        }
    }

    /// Execute an authorized job and normalize its outcome.
    pub async fn execute(&self, job: &Job) -> Result<ExecutionResult, RelayError> {
        let outcome = self.executor.execute(job).await;
        normalize(job.key, outcome)
    }

    /// Execute and render. Always yields exactly one reply per job.
    pub async fn run(&self, job: &Job, source: RequestSource) -> Reply {
        match self.execute(job).await {
            Ok(result) => self.render(&result, source),
            Err(e) => Reply::error(&e),
        }
    }

    fn render(&self, result: &ExecutionResult, source: RequestSource) -> Reply {
        if let Some(exit) = result.exit_status.filter(|s| *s != 0) {
            log::debug!("command exited with status {}", exit);
        }
        let text = format!("<pre>{}</pre>", escape_html(&result.text));
        let visualize = result
            .disks
            .as_deref()
            .filter(|d| !d.is_empty())
            .and_then(|d| visualization_url(&self.webapp_url, d));
        let markup = match (visualize, source) {
            (Some(url), _) => Markup::Visualize(url),
            (None, RequestSource::Callback) => Markup::Actions,
            (None, _) => Markup::None,
        };
        Reply { text, markup }
    }

    async fn welcome(&self, principal: Principal) -> Reply {
        let ip = self
            .executor
            .probe_local_ip()
            .await
            .unwrap_or_else(|| "unknown".to_string());
        let text = format!(
            "✅ Relay active!\nUser ID: <code>{}</code>\nHost: {} ({})\n\nOpen the control panel:",
            principal,
            escape_html(&ip),
            self.executor.catalog().platform().as_str()
        );
        Reply {
            text,
            markup: Markup::Actions,
        }
    }
}

/// Longest invocation echoed back in the "running" notice.
const NOTICE_INVOCATION_BYTES: usize = 512;

/// "⚙️ Running: …" acknowledgement sent before a job starts. Long invocations are cut.
pub fn running_notice(job: &Job) -> Reply {
    let (mut shown, truncated) = truncate_to_budget(job.invocation.clone(), NOTICE_INVOCATION_BYTES);
    if truncated {
        shown.push('…');
    }
    Reply {
        text: format!("⚙️ Running: <code>{}</code>", escape_html(&shown)),
        markup: Markup::None,
    }
}

/// Control panel URL carrying disk records as base64url JSON.
pub fn visualization_url(webapp_url: &str, disks: &[DiskRecord]) -> Option<String> {
    let json = match serde_json::to_vec(disks) {
        Ok(j) => j,
        Err(e) => {
            log::warn!("serializing disk records failed: {}", e);
            return None;
        }
    };
    let data = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
    let sep = if webapp_url.contains('?') { '&' } else { '?' };
    Some(format!("{}{}view=disk&data={}", webapp_url, sep, data))
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
