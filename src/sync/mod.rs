//! Blocking transport over the PostgreSQL wire protocol.

mod cancel;
mod link;
mod stream;

pub use cancel::PgCancel;
pub use link::PgLink;
