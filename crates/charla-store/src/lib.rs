pub mod crypto;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use crypto::{ContextCipher, CryptoError};
pub use error::{Result, StoreError};
pub use store::Store;
pub use types::*;
