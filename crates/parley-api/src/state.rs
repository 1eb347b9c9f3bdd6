use std::sync::Arc;

use parley_db::ConversationStore;
use parley_messaging::MessagingCore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub core: MessagingCore,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        self.core.conversations.store()
    }
}
