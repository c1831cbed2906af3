use std::sync::Arc;
use std::time::Instant;

use vigil_core::app::AppContext;

use crate::config::ServerSection;

/// Shared application state, wrapped in Arc for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub config: ServerSection,
    pub ctx: Arc<AppContext>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ServerSection, ctx: Arc<AppContext>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                ctx,
                start_time: Instant::now(),
            }),
        }
    }

    pub fn ctx(&self) -> &Arc<AppContext> {
        &self.inner.ctx
    }
}
