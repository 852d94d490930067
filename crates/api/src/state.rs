//! Application state

use std::sync::Arc;
use tasklane_billing::BillingService;

use crate::{auth::JwtManager, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// None when billing is disabled or unconfigured
    pub billing: Option<Arc<BillingService>>,
}

impl AppState {
    pub fn new(config: Config, billing: Option<Arc<BillingService>>) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config,
            jwt_manager,
            billing,
        }
    }
}
