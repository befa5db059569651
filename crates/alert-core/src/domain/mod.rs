//! 도메인 모델.

pub mod alert;
pub mod index_entry;
pub mod tick;

pub use alert::*;
pub use index_entry::*;
pub use tick::*;
