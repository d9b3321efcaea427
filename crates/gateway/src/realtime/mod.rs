//! Realtime fan-out: the hub indexes websocket connections by
//! (stream, user) and pushes JSON frames to every subscriber.

pub mod frame;
pub mod hub;
pub mod ws;

pub use frame::{ControlAction, ControlFrame, ServerFrame};
pub use hub::{EventSink, Hub, SEND_QUEUE_CAPACITY};
