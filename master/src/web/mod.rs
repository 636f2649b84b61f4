pub mod handlers;
pub mod server;

pub use server::{create_router, start_web_server};

use std::sync::Arc;

use crate::config::Config;
use crate::restoration_tracker::RestorationTracker;
use crate::services::AdminService;

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub admin_service: Arc<AdminService>,
    pub restoration_tracker: RestorationTracker,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        admin_service: Arc<AdminService>,
        restoration_tracker: RestorationTracker,
    ) -> Self {
        Self {
            config,
            admin_service,
            restoration_tracker,
        }
    }
}
