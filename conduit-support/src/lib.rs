pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, EventError, NetworkError, PacketError, Result, TagKind, UserDataError};
pub use logging::Logger;
