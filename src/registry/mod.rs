//! Session registry
//!
//! The registry deduplicates upstream sessions by [`StreamKey`] and removes
//! them once they terminate.
//!
//! ```text
//!                       Arc<SessionRegistry>
//!                  ┌──────────────────────────┐
//!                  │ slots: HashMap<Key,      │
//!                  │   Slot {                 │
//!                  │     id,                  │
//!                  │     cell: OnceCell<      │
//!                  │       Arc<StreamSession>>│
//!                  │   }                      │
//!                  │ >                        │
//!                  └────────────┬─────────────┘
//!                               │ get_or_create()
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!       [endpoint]         [endpoint]        [watcher task]
//!       subscribe()        subscribe()       wait_terminated()
//!                                            └──► remove slot
//! ```
//!
//! Chunks are `bytes::Bytes`, so every subscriber queue holds a reference
//! to the same allocation rather than a copy.

pub mod config;
pub mod key;
pub mod store;

pub use config::{OverflowPolicy, RegistryConfig};
pub use key::StreamKey;
pub use store::SessionRegistry;
