pub mod lock;
pub mod message_queue;
pub mod repository;

pub use lock::*;
pub use message_queue::*;
pub use repository::*;
