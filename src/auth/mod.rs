// Authentication module
// Session state, token persistence and the authority contract

mod authority;
mod manager;
mod store;
mod types;

pub use authority::{AuthorityClient, HttpAuthorityClient};
pub use manager::SessionManager;
pub use store::{
    clear_pair, load_pair, save_pair, MemoryTokenStore, SqliteTokenStore, TokenStore,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use types::{
    token_preview, AuthorityResult, Credentials, RegisterRequest, SessionSnapshot, SessionStatus,
    TokenPair,
};
