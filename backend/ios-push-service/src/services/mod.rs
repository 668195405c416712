pub mod connection_cache;
pub mod connection_factory;
pub mod credential_store;
pub mod invalidation_listener;
pub mod push_dispatcher;

pub use connection_cache::*;
pub use connection_factory::*;
pub use credential_store::*;
pub use invalidation_listener::*;
pub use push_dispatcher::*;
