pub mod conversations;
pub mod error;
pub mod media;
pub mod members;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};

#[cfg(test)]
pub(crate) mod testing;
