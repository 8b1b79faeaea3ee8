mod error;
mod header;
mod message;
mod message_id;
mod message_type;
mod return_code;

/// Service Discovery
pub mod sd;

pub use error::Error;
pub use header::{HEADER_SIZE, Header, PROTOCOL_VERSION};
pub use message::{Message, MessagePayload};
pub use message_id::MessageId;
pub use message_type::{MessageType, MessageTypeField};
pub use return_code::ReturnCode;
