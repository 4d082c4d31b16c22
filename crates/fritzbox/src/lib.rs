// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the FRITZ!Box web management interface.
//!
//! The device speaks a small session protocol on top of its web UI: a challenge-response login
//! on `login_sid.lua` hands out a session ID (`sid`) that every later request carries, either
//! as a query parameter (`query.lua`) or inside a form-encoded body (`data.lua`). This crate
//! owns that protocol and the decoders for the payloads the exporter reads; it keeps no state
//! between calls.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod auth;
pub mod client;
pub mod errors;
pub mod model;
pub mod session;

pub use auth::{Authenticator, ChallengeAnswer};
pub use client::{Device, FritzClient};
pub use errors::{AuthError, ClientError, DecodeError};
pub use session::{Credentials, Session, SessionId};
