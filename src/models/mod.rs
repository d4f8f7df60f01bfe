pub mod message;
pub mod participant;
pub mod preference;

pub use message::{ConversationSummary, MessageRecord, MessageStatus, NewMessage};
pub use participant::{Participant, Role};
pub use preference::NotificationPreference;
