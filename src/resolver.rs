//! Request resolver: decides redirect-vs-render for an incoming hostname.
//!
//! The resolver owns no state. It is a pure function of the project
//! registry, the page cache, and the request hostname; the server layer
//! turns its decision into an HTTP response and logs the outcome.

use crate::pages::{PageCache, SPLASH_PAGE_ID};
use crate::registry::{Project, ProjectRegistry, RedirectTarget};
use crate::render;
use tracing::warn;

/// Title used when a project does not configure one
pub const DEFAULT_TITLE: &str = "Under Construction";

/// Per-snapshot values spliced into rendered pages and redirect locations
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub instance_id: &'a str,
    pub version: &'a str,
    pub public_port: &'a str,
}

/// Terminal decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// 302 to `location`
    Redirect {
        location: String,
        dest: String,
        project_id: String,
    },
    /// 200 with a rendered (or raw fallback) body
    Content { body: String, project_id: String },
}

impl Resolution {
    pub fn project_id(&self) -> &str {
        match self {
            Resolution::Redirect { project_id, .. } => project_id,
            Resolution::Content { project_id, .. } => project_id,
        }
    }
}

/// Resolve a request hostname against the registry and page cache.
///
/// A redirect wins over a custom page when a project configures both.
pub fn resolve(
    registry: &ProjectRegistry,
    pages: &PageCache,
    ctx: &RenderContext<'_>,
    hostname: &str,
) -> Resolution {
    let project = registry.match_domain(hostname);

    if let Some(project) = project {
        if let Some(target) = &project.redirect {
            match target {
                RedirectTarget::Internal(id) => {
                    // Validation guarantees the target project exists, but
                    // not that it has a domain to redirect to.
                    match registry.get(id).and_then(|t| t.domain.as_deref()) {
                        Some(domain) => {
                            return Resolution::Redirect {
                                location: format!("//{}:{}/", domain, ctx.public_port),
                                dest: domain.to_string(),
                                project_id: project.id.clone(),
                            };
                        }
                        None => {
                            warn!(
                                project_id = %project.id,
                                target = %id,
                                "Redirect target has no domain. Serving the splash page instead"
                            );
                        }
                    }
                }
                RedirectTarget::External(url) => {
                    return Resolution::Redirect {
                        location: url.clone(),
                        dest: url.clone(),
                        project_id: project.id.clone(),
                    };
                }
            }
        }

        return render_project(project, pages, ctx);
    }

    // Unconfigured hostname: the hostname stands in as an ad-hoc project
    // id and becomes the splash subtitle.
    let body = match pages.get_by_id(SPLASH_PAGE_ID) {
        Some(page) => render::render(
            page,
            DEFAULT_TITLE,
            DEFAULT_TITLE,
            Some(hostname),
            None,
            ctx.instance_id,
            ctx.version,
        ),
        None => raw_fallback(DEFAULT_TITLE, hostname),
    };

    Resolution::Content {
        body,
        project_id: hostname.to_string(),
    }
}

fn render_project(
    project: &Project,
    pages: &PageCache,
    ctx: &RenderContext<'_>,
) -> Resolution {
    let title = project.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let page_title = project.page_title.as_deref().unwrap_or(title);
    let subtitle = project
        .subtitle
        .as_deref()
        .or(project.cn.as_deref())
        .unwrap_or(&project.id);

    // A custom page renders the entry cached under the project id; without
    // one (or when its load failed) the default splash entry applies.
    let page = project
        .page
        .as_deref()
        .and_then(|_| pages.get_by_id(&project.id))
        .or_else(|| pages.get_by_id(SPLASH_PAGE_ID));

    let body = match page {
        Some(page) => render::render(
            page,
            page_title,
            title,
            Some(subtitle),
            None,
            ctx.instance_id,
            ctx.version,
        ),
        // Degraded but always-available response
        None => raw_fallback(title, subtitle),
    };

    Resolution::Content {
        body,
        project_id: project.id.clone(),
    }
}

fn raw_fallback(title: &str, subtitle: &str) -> String {
    format!("{title}\n{subtitle}")
}
