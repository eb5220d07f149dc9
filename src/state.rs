use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::notify::NotificationSender;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub notifier: Box<dyn NotificationSender>,
    /// Guards against overlapping assignment cycles; a tick that finds it
    /// set is skipped.
    pub assigning: AtomicBool,
}
