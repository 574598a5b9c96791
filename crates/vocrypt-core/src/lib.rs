pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod mood;
pub mod responder;

pub use errors::ResponderError;
pub use events::{InboundEvent, OutboundEvent};
pub use ids::{ConnectionId, MessageId, SessionId};
pub use model::{Message, MessageType, Session};
pub use mood::{Mood, MoodInfo, UnknownMood};
pub use responder::Responder;
