//! amd-core - Core library for AMD lead capture
//!
//! This crate holds the partner/token attribution state machine and everything
//! that propagates it: the two storage tiers, the resolver, token acquisition,
//! outbound link patching, and the lead submission pipeline. Browser concerns
//! (storage, clock, network) are injected through traits so the same logic runs
//! in tests, in a wasm shell, or behind a server.

pub mod attribution;
pub mod config;
pub mod error;
pub mod lead;
pub mod links;
pub mod message;
pub mod session;
pub mod storage;
pub mod token;
pub mod util;

pub use attribution::{Attribution, AttributionResolver, PageUrl};
pub use config::SiteConfig;
pub use error::{Error, Result};
pub use lead::{Channel, FormData, LeadRecord, LeadSubmitter, Service};
pub use links::{Anchor, LinkPatcher, WatchedLinks};
pub use session::{PageSession, PartnerPresentation};
pub use storage::{AttributionStore, Clock, MemoryTier, StorageTier, SystemClock};
pub use token::{TokenIssuer, TokenOutcome};
