mod client;
mod publisher;

pub use client::NatsClient;
pub use publisher::NatsEventPublisher;
