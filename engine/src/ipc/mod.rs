//! IPC server: s-expression protocol over a Unix domain socket.
//!
//! Hosts register surfaces and receive scroll/menu/status events; estimator
//! clients stream gaze samples in and receive calibration training pairs.
//! Wire format: 4-byte big-endian length prefix + UTF-8 s-expression payload.

pub mod dispatch;
pub mod outbound;
pub mod server;

pub use server::{ClientRole, IpcServer};
