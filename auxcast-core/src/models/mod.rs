pub mod broadcast;
pub mod id;
pub mod listener;
pub mod message;
pub mod track;
pub mod user;

pub use broadcast::{Broadcast, BroadcastStatus, EndReason};
pub use id::{generate_id, BroadcastId, MessageId, UserId};
pub use listener::{Follow, ListenerPresence};
pub use message::{ChatMessage, MessageKind};
pub use track::CurrentTrack;
pub use user::{CuratorSummary, User};
