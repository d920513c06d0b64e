//! Fan-out of transcript and translation events to subscribers

mod event;
mod fanout;
mod subscriber;

pub use event::{EventKind, SegmentEvent};
pub use fanout::{Broadcaster, Subscription};
pub use subscriber::{Offer, SubscriberQueue, SubscriptionOptions};
