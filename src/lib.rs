//! CubeTrace records the strokes a toio cube draws as it is pushed around
//! its mat, keeps them durably, and plays them back: on a drawing surface,
//! or by driving the cube itself along the recorded path.
//!
//! The cube streams its position over a wireless [link] as small binary
//! notifications. Those are decoded by the [telemetry_decoder], fanned out
//! to observers by [telemetry], mapped into drawing space by
//! [coordinates], and buffered per device by the [stroke_cache] before
//! they reach durable [storage]. Driving goes the other way: a trace becomes
//! a list of targets, the [command_encoder] packs them into motor frames,
//! and [motor_control] sends those one at a time, waiting for the cube to
//! acknowledge each.
//!
//! Pairing and service discovery are not handled here; anything that can
//! hand over a connected [link::Link] works, including the [sim_cube] used
//! by the `cubetrace` binary.

#![warn(missing_docs)]
#[allow(missing_docs)]
pub mod args;
pub mod command_encoder;
pub mod config;
pub mod coordinates;
pub mod error;
pub mod link;
pub mod motor_control;
pub mod position;
pub mod recorder;
pub mod render;
pub mod replay;
pub mod session;
pub mod sim_cube;
pub mod storage;
pub mod stroke_cache;
pub mod telemetry;
pub mod telemetry_decoder;
pub mod trace_record;
