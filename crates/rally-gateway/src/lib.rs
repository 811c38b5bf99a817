pub mod connection;
pub mod dispatcher;
pub mod presence;
pub mod rooms;

pub use dispatcher::{Delivery, Dispatcher, SessionKey};
