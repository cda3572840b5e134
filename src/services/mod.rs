//! Services module - the remote platform behind an async trait.
//!
//! # Components
//!
//! - [`PlatformApi`]: one async method per endpoint a task body calls
//! - [`HttpApi`]: the `reqwest` implementation, signing requests with the
//!   current [`PlatformConstants`](crate::models::PlatformConstants)
//!
//! # Design Philosophy
//!
//! Services carry no scheduling or state logic. Task bodies decide what to do
//! with a reply; non-zero platform codes that drive a decision (QR poll codes,
//! face verification) come back as data instead of errors.

pub mod api;
pub mod http;

pub use api::{
    ApiError, ApiReply, AreaEntry, AreaGroup, NavInfo, PlatformApi, QrCode, QrPoll, RoomSnapshot,
    StartLiveReply, TitleReply,
};
pub use http::{ApiEndpoints, HttpApi};
