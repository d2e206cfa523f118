//! Output storage: per-document layout, atomic envelope writes, intermediate artifacts.

mod error;
pub use error::StoreError;

mod layout;
pub use layout::{OutputLayout, load_envelope};
