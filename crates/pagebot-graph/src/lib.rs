//! pagebot-graph - Messenger Send API client
//!
//! Modules:
//! - client: authenticated POSTs to the page `messages` endpoint
//! - payload: request bodies (text, sender actions, attachments, carousels)
//! - media: attachment kind detection from URLs

pub mod client;
pub mod media;
pub mod payload;

pub use client::{GraphClient, GraphError, SendResponse, DEFAULT_GRAPH_API_URL};
pub use media::MediaKind;
pub use payload::{Button, CardElement, SendRequest, SenderAction};
