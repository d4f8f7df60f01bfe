pub mod conversation_service;
pub mod email;
pub mod message_service;
pub mod notification_service;
pub mod push;
