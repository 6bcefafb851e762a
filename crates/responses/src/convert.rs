//! Bidirectional translation between the canonical `/v1/responses` shapes and
//! the provider-facing chat completion shapes.
//!
//! The forward direction builds the upstream `messages` array from the input
//! item log; the backward direction turns a completion into a canonical
//! response, splitting `<think>` reasoning and attaching citations.

mod from_chat;
mod to_chat;

pub use from_chat::{BackwardContext, response_from_completion, split_reasoning};
pub use to_chat::messages_from_input;
