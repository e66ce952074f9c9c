pub mod client;
pub mod comm;
pub mod completion;
pub mod core;
pub mod dispatch;
pub mod job;
pub mod notifications;
pub mod reactor;
pub mod rpc;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use comm::CommRef;
pub use core::CoreRef;
pub use notifications::Notifications;
pub use rpc::connection_initiator;
