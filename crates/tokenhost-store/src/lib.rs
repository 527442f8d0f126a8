//! Token storage for tokenhost.
//!
//! The auth engine persists credentials only through the [`TokenStore`]
//! contract: `get`, `set`, `delete` over JSON values. Hosts that already own
//! a durable store implement the trait themselves; this crate ships two
//! reference backends.
//!
//! # Modules
//!
//! - [`store`]: the [`TokenStore`] trait.
//! - [`memory`]: [`MemoryTokenStore`], process-local.
//! - [`file`]: [`JsonFileTokenStore`], one JSON object on disk.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tokenhost_store::{JsonFileTokenStore, TokenStore};
//!
//! # async fn example() -> tokenhost_store::Result<()> {
//! let store = JsonFileTokenStore::new("data/tokens.json");
//! store.set("oauth_tokens", serde_json::json!({ "access_token": "..." })).await?;
//! let tokens = store.get("oauth_tokens").await?;
//! assert!(tokens.is_some());
//! store.delete("oauth_tokens").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::{Result, StoreError};
pub use file::JsonFileTokenStore;
pub use memory::MemoryTokenStore;
pub use store::TokenStore;
