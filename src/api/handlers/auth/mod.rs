//! Access arbitration: credential store, device registry, session manager,
//! guest registry, and the per-request decision middleware.

pub mod admin;
pub mod credential;
pub mod device;
pub mod guest;
pub mod login;
pub mod middleware;
pub mod principal;
pub mod session;
pub mod state;
pub mod types;

pub(crate) mod storage;
pub(crate) mod utils;


pub use middleware::arbitrate;
pub use principal::Principal;
pub use state::{AuthConfig, AuthState};
