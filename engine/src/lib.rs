//! gaze-dwell: dwell-based gaze interaction engine.
//!
//! Turns a noisy stream of estimated gaze points into discrete actions:
//! edge-zone scrolling, a radial control menu and a calibration sequence.
//! The `gaze` module holds the host-agnostic engine; `state`, `ipc` and
//! `daemon` wrap it in a socket service. The binary entry point lives in
//! `main.rs`.

pub mod action;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod gaze;
pub mod input_source;
pub mod ipc;
pub mod replay;
pub mod session;
pub mod sexp;
pub mod state;
