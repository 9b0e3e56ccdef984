pub mod broadcaster;
pub mod message;

pub use broadcaster::{Broadcaster, SubscriberStream, Subscription};
pub use message::{GameUpdate, StreamMessage};
