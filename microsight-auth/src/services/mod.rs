pub mod google;
pub mod oauth;
pub mod password;
pub mod refresh_ledger;
pub mod session;

pub use session::{AuthSession, AuthStores, OAuthSession, RegisterInput, SessionService};
