use std::sync::Arc;

use encore_gateway::Chat;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: Chat,
}
