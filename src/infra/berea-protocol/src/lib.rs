mod error;
mod message;
mod wire;

pub use error::*;
pub use message::*;
pub use wire::*;
