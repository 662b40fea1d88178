pub mod encoder;
pub mod error;
pub mod message;


pub use encoder::{convert, ApiReply, Encoder, JsonEncoder};
pub use error::{RemotingError, Result, SESSION_EXPIRED};
pub use message::{Message, MessageId, MessageKind};
