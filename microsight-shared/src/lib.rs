pub mod access_token;
pub mod types;
pub mod errors;
pub mod middleware;
pub mod clients;

pub use access_token::{AccessTokenKeys, AccessTokenState};
pub use types::*;
pub use errors::{AppError, ErrorCode, AppResult};
