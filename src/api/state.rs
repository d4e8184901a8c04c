use std::sync::Arc;

use crate::config::AccessConfig;
use crate::dispatch::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub access: Arc<AccessConfig>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, access: AccessConfig) -> Self {
        Self {
            dispatcher,
            access: Arc::new(access),
        }
    }
}
