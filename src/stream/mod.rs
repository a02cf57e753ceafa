//! Stream adapters over pipeline output

mod delivery;
mod events;

pub use delivery::{ChannelRenderer, DeliveryStream, channel};
pub use events::EventStream;
