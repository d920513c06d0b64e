use crate::config::ServiceConfig;
use crate::session::SessionController;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle controller owning every live session
    pub controller: SessionController,

    /// Service name, bind address and CORS origin
    pub service: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(controller: SessionController, service: ServiceConfig) -> Self {
        Self {
            controller,
            service: Arc::new(service),
        }
    }
}
