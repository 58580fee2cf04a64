use alertgest_storage::Store;
use std::sync::Arc;
use tokio::sync::watch;

use crate::capture::WindowManager;
use crate::digest::DeliveryCoordinator;
use crate::scheduler::SchedulerStatus;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub windows: Arc<WindowManager>,
    pub delivery: Arc<DeliveryCoordinator>,
    pub scheduler_status: watch::Receiver<SchedulerStatus>,
}
