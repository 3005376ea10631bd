mod channel;
mod session;

pub use channel::ChannelConfigBuilder;
pub use session::SessionConfigBuilder;
