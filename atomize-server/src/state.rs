//! Shared application state for the service.

use std::sync::Arc;

use atomize::cancel::CancelToken;
use atomize::io::config::AtomizeConfig;
use atomize::io::generator::{CommandPlanGenerator, PlanGenerator};
use atomize::io::lock::RepoLocks;

/// Generator shared across request workers.
pub type SharedGenerator = Arc<dyn PlanGenerator + Send + Sync>;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolved at startup; requests may override diff settings per call.
    pub config: Arc<AtomizeConfig>,
    /// One lease per repository path across all in-flight applies.
    pub locks: Arc<RepoLocks>,
    pub generator: SharedGenerator,
    /// Fired on shutdown so running applies stop at the next unit boundary.
    pub shutdown: CancelToken,
}

impl AppState {
    pub fn new(config: AtomizeConfig) -> Self {
        let generator = Arc::new(CommandPlanGenerator::from_config(&config, None));
        Self::with_generator(config, generator)
    }

    pub fn with_generator(config: AtomizeConfig, generator: SharedGenerator) -> Self {
        Self {
            config: Arc::new(config),
            locks: RepoLocks::new(),
            generator,
            shutdown: CancelToken::new(),
        }
    }
}
