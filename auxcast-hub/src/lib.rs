pub mod events;
pub mod hub;
pub mod publisher;
pub mod reconcile;

pub use events::FanoutEvent;
pub use hub::FanoutHub;
pub use publisher::HubEventPublisher;
pub use reconcile::Reconciler;
