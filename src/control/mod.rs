//! Remote control channel to the acquisition application.
//!
//! The application exposes a DevTools-style endpoint on a fixed local port:
//! - [`RemoteControlClient`] discovers a page target and opens a [`CdpSession`]
//! - [`CdpSession`] implements [`ControlSurface`](crate::traits::ControlSurface) by
//!   evaluating the scripts in [`script`]
//! - [`UiSnapshot`] is the flattened element view the locators work on

pub mod cdp;
pub mod client;
pub mod script;
pub mod snapshot;

pub use cdp::{CdpSession, TargetInfo};
pub use client::RemoteControlClient;
pub use snapshot::{ElementRef, ElementSnapshot, UiSnapshot};
