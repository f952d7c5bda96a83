pub mod driver;
pub mod error;
pub mod selectors;
pub mod session;
pub mod surface;

pub use driver::WaDriver;
pub use error::{DriverError, Result};
pub use session::ProfileLock;
pub use surface::{ChatSurface, InboxEntry, IncomingMessage};
