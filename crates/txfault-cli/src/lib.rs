//! Scripted sessions against a txfault controller.
//!
//! [`script`] loads a JSON session and replays it step by step; the
//! `txfault` binary wraps it for the command line.

pub mod script;
