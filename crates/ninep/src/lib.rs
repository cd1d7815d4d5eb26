#![forbid(unsafe_code)]
//! Asynchronous 9P2000 filesystem server library for Rust.
//!
//! This crate provides a tokio-based implementation of the plain 9P2000
//! protocol, allowing you to serve a file tree to clients such as the
//! Linux kernel's v9fs module or Plan 9's devmnt.
//!
//! # Overview
//!
//! The 9P protocol was developed for the Plan 9 distributed operating
//! system: clients negotiate a protocol version, attach to the served
//! tree, and then operate on files through fids, the client-chosen 32-bit
//! handles naming positions in the tree.
//!
//! To serve a tree you need to:
//!
//! 1. Implement the [`fs::Filesystem`] and [`fs::File`] traits for your
//!    backing store
//! 2. Start the server with [`srv::srv_async`]
//!
//! # Message Flow
//!
//! 1. **Version negotiation**: client sends `TVersion`, the server caps the
//!    message size at 8 KiB and accepts only the version string `9P2000`
//! 2. **Attach**: the client binds a fid to the root of the tree
//!    (authentication is refused; this server requires none)
//! 3. **Operations**: `walk`, `open`, `create`, `read`, `write`, `stat`,
//!    `remove`, `clunk`
//!
//! Within one connection messages are processed strictly sequentially;
//! every connection runs its own independent session.
//!
//! # Fid Management
//!
//! The server tracks fids in a per-session table. A fid is created by
//! `TAttach` or `TWalk`, gains an open handle through `TOpen`/`TCreate`,
//! and is destroyed by `TClunk`/`TRemove`. Handles are owned by exactly
//! one fid and are released on every removal path, including connection
//! teardown.
//!
//! # Error Handling
//!
//! Recoverable errors ([`error::Error`] values with an `ename`) are
//! reported to the client as `RError` replies; malformed or out-of-order
//! messages end the session and close the connection.
pub mod error;
pub mod fcall;
pub mod fs;
pub mod serialize;
pub mod srv;
#[macro_use]
pub mod utils;

pub use crate::error::Error;
pub use crate::fcall::*;
pub use crate::utils::Result;
