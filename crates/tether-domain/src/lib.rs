pub mod cache;
pub mod channel;
pub mod entity;
pub mod error;
pub mod event;
pub mod fanout;
pub mod in_memory;
pub mod index;
pub mod registry;
pub mod repository;
pub mod request;
pub mod search;
pub mod snapshot;
pub mod stream;

pub use cache::{DeviceManagementCache, EntityCache};
pub use channel::{ChannelCollaborators, ChannelConfig, ChannelState, TenantEventChannel};
pub use entity::*;
pub use error::{DomainError, DomainResult};
pub use event::*;
pub use fanout::{topic_for, FanoutProcessor, WireEvent};
pub use in_memory::*;
pub use index::{DeviceEventIndex, IndexKey, IndexPolicy};
pub use registry::ChannelRegistry;
pub use repository::{
    DeviceDirectory, DeviceStateRepository, EventPublisher, EventRepository, TenantBootstrap,
};
pub use request::*;
pub use search::{DateRangeCriteria, EventPage, PageRequest};
pub use snapshot::{DeviceStateSnapshot, DeviceStateUpdate};
pub use stream::EventStream;
