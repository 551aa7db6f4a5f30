//! Event multiplexer / reply dispatcher.
//!
//! One [`ReplyDispatcher::dispatch`] call owns one reply to one incoming
//! message: it selects a model through the fallback controller, multiplexes
//! the agent's event stream into a composed render, drives the block
//! chunker and draft throttle, and finalizes the draft into the permanent
//! reply (or a single labeled failure notice) on the terminal event.

pub mod cache;
pub mod dispatcher;
pub mod finalize;
pub mod render;

pub use {
    cache::RecentSendCache,
    dispatcher::{DispatchReport, DispatcherOptions, ReplyDispatcher},
    render::{RenderState, compose_render},
};
