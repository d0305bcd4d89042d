pub mod auth;
pub mod chat;
pub mod connection;
pub mod directory;
pub mod dispatcher;
pub mod ingest;
pub mod receipts;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod typing;

use std::sync::Arc;

use anyhow::anyhow;
use encore_db::Database;
use encore_types::error::{ChatError, ChatResult};

pub use chat::Chat;
pub use dispatcher::Dispatcher;

/// Run a blocking database call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> ChatResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
        .map_err(ChatError::from)
}
