pub mod card;
pub mod record;
pub mod service;

pub use record::{CharacterRecord, ConversationMethod};
pub use service::CharacterService;
