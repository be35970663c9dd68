//! Process-wide state: snapshot construction and atomic replacement.
//!
//! A snapshot owns one loaded configuration, one validated project
//! registry, and one populated page cache. Reload builds the next
//! snapshot entirely off to the side and publishes it with a single
//! reference swap, so a request never observes a half-populated registry.

use crate::config::{Config, ConfigError, ConfigStore};
use crate::pages::{PageCache, ERROR_PAGE_ID, SPLASH_PAGE_ID};
use crate::registry::ProjectRegistry;
use crate::resolver::RenderContext;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_ERROR_PAGE: &str = "default/error.html";
const DEFAULT_SPLASH_PAGE: &str = "default/splash.html";

/// One immutable view of the configured world
#[derive(Debug)]
pub struct Snapshot {
    pub config: Config,
    pub registry: ProjectRegistry,
    pub pages: PageCache,
}

impl Snapshot {
    /// Load the configuration and derive the registry and page cache
    /// from it.
    pub fn build(store: &ConfigStore, sanitize_version_check: bool) -> Result<Self, ConfigError> {
        let config = store.load(sanitize_version_check)?;
        let mut registry = ProjectRegistry::build(&config.projects);
        let mut pages = PageCache::new();
        let root = store.root();

        // Cache each project's custom page. A page path that does not
        // resolve to a file is cleared so the project falls back to the
        // default splash page.
        for project in registry.projects_mut() {
            let Some(page) = project.page.clone() else {
                continue;
            };
            let path = root.join(&page);
            if path.exists() {
                pages.load(&path, Some(&project.id));
            } else {
                warn!(
                    project_id = %project.id,
                    page = %page,
                    "Invalid page for project. Falling back to the default page"
                );
                project.page = None;
            }
        }

        pages.load(&root.join(DEFAULT_ERROR_PAGE), Some(ERROR_PAGE_ID));
        pages.load(&root.join(DEFAULT_SPLASH_PAGE), Some(SPLASH_PAGE_ID));

        // A configured error page overrides the default ERROR entry
        if let Some(error_page) = config.error_page() {
            let path = root.join(error_page);
            if path.exists() {
                pages.load(&path, Some(ERROR_PAGE_ID));
            } else {
                warn!(
                    path = %path.display(),
                    "Invalid error page configuration. Keeping the default error page"
                );
            }
        }

        Ok(Self {
            config,
            registry,
            pages,
        })
    }

    pub fn render_ctx(&self) -> RenderContext<'_> {
        RenderContext {
            instance_id: self.config.instance_id(),
            version: self.config.version(),
            public_port: self.config.public_port(),
        }
    }
}

/// Shared application state.
///
/// Designed to be used behind an `Arc` for shared ownership across async
/// tasks; [`load`](AppState::load) returns `Arc<Self>` directly to
/// enforce this pattern. Readers take a cheap `Arc<Snapshot>` clone and
/// keep a consistent view for the lifetime of their request.
#[derive(Debug)]
pub struct AppState {
    store: ConfigStore,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl AppState {
    /// Build the initial snapshot. The version upgrade check runs only on
    /// this first load.
    pub fn load(store: ConfigStore) -> Result<Arc<Self>, ConfigError> {
        let snapshot = Snapshot::build(&store, true)?;
        Ok(Arc::new(Self {
            store,
            snapshot: RwLock::new(Arc::new(snapshot)),
        }))
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Rebuild configuration, registry, and page cache, then publish the
    /// new snapshot with a single reference swap.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let snapshot = Snapshot::build(&self.store, false)?;
        info!(
            projects = snapshot.registry.len(),
            pages = snapshot.pages.len(),
            "Configuration reloaded"
        );
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }
}
