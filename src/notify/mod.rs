//! Outbound notification building blocks: destination lookup, message
//! composition and delivery.

pub mod compose;
pub mod destination;
pub mod sender;

pub use self::compose::{compose, render_line, RenderProfile};
pub use self::destination::{Destination, DestinationRule, Resolution};
pub use self::sender::{HttpSmsSender, MessageSender, RecordingSender, SendReceipt};
