//! The live-streaming target: its HTTP API, the virtual-user scenarios that
//! drive it and the checks run around the timed phase.

mod client;
mod scenarios;
mod suite;
mod types;

pub use client::{ApiError, PipeClient};
pub use scenarios::{Account, PipeScenario, SentTip, ViewerSession};
pub use suite::PipeSuite;
pub use types::{
    IconResponse, InitializeResponse, Livecomment, LivecommentRequest, Livestream, LoginRequest,
    Owner, RegisterRequest, ReservationRequest, Statistics, User,
};
