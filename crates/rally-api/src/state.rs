use std::sync::Arc;

use tracing::error;

use rally_db::Database;
use rally_gateway::Dispatcher;

use crate::error::ApiError;
use crate::media::LocalBlobStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub media: LocalBlobStore,
}

impl AppStateInner {
    /// Run a store call off the async runtime.
    pub async fn store<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> rally_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}
