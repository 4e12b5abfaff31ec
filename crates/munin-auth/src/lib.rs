//! Sessions and role-based access control (spec.md §4.6, C6).
//!
//! `munin-auth` sits above `munin-keys` and `munin-audit`: it turns a
//! verified passphrase into a bearer-token `Session`, and turns a
//! `Role` into an access decision. Neither `munin-decisions` nor
//! `munin-packets` depend on it — they take a `Role` as a plain
//! argument and leave the HTTP-facing bookkeeping to `munin-server`.

pub mod rbac;
mod session;
pub mod types;

pub use session::SessionManager;
pub use types::{LoginSuccess, Session, SessionPolicy};
