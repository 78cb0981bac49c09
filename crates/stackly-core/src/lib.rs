pub mod events;
pub mod ids;
pub mod status;

pub use events::{Connectivity, PresenceEvent, RoomEvent};
pub use ids::{ChannelId, ConnectionId, JobId, UserId};
pub use status::{PresenceStatus, StatusChange, StatusRecord, StatusRejection};
