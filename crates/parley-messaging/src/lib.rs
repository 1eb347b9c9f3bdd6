//! Conversation messaging: who may post where, who hears about it, and how
//! a new message reaches them.

pub mod authorization;
pub mod channels;
pub mod conversations;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod mentions;
pub mod recipients;

use std::sync::Arc;

use parley_db::ConversationStore;
use parley_gateway::PushTransport;

pub use authorization::{AuthorizationGate, CourseAuthorization};
pub use channels::{ChannelService, DefaultChannelType};
pub use conversations::ConversationService;
pub use error::{ErrorKind, MessagingError, Result};
pub use fanout::{DispatchOutcome, MessagingService, PostedMessage};

/// All messaging services wired to one store, transport and gate.
#[derive(Clone)]
pub struct MessagingCore {
    pub gate: Arc<dyn AuthorizationGate>,
    pub conversations: ConversationService,
    pub channels: ChannelService,
    pub messages: MessagingService,
}

impl MessagingCore {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        transport: Arc<dyn PushTransport>,
        gate: Arc<dyn AuthorizationGate>,
    ) -> Self {
        let conversations = ConversationService::new(store.clone(), transport);
        let channels = ChannelService::new(store.clone(), conversations.clone());
        let messages = MessagingService::new(store, gate.clone(), conversations.clone());
        Self {
            gate,
            conversations,
            channels,
            messages,
        }
    }

    /// Default wiring: authorization derived from course roles in the same store.
    pub fn with_course_authorization(store: Arc<dyn ConversationStore>, transport: Arc<dyn PushTransport>) -> Self {
        let gate = Arc::new(CourseAuthorization::new(store.clone()));
        Self::new(store, transport, gate)
    }
}
