#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Skylark is an async audio routing hub for amateur-radio voice
//! interconnect, written in Rust. The library offers:
//!  * A bit-exact codec for AllStarLink's USRP wire framing — all seven
//!  packet types, TLV metadata, and the protocol's mixed-endian layout.
//!  * A hub-and-spoke router mediating concurrent transmissions across
//!  heterogeneous voice services, with a concurrency cap and
//!  priority-based preemption.
//!  * Per-service endpoint workers for USRP nodes, WhoTalkie-style Opus
//!  peers, Discord voice (through an external gateway client), and
//!  generic UDP/TCP byte services.
//!  * In-process Opus transcoding and anti-aliased resampling on every
//!  destination-bound format change.
//!
//! The CLI/config-file loader, the HTTP status surface, and the Discord
//! gateway client are external collaborators: the loader hands in a
//! [`Config`], the status surface polls [`Hub::snapshot`], and the
//! gateway client drives a [`ClientChannels`] pair.
//!
//! ## Quick start
//! ```no_run
//! use skylark::{Config, Hub, ServiceConfig, ServiceType};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default()
//!     .service(
//!         ServiceConfig::new(ServiceType::Usrp, "usrp_main")
//!             .listen("0.0.0.0", 32001)
//!             .remote("10.0.0.1", 34001),
//!     )
//!     .service(ServiceConfig::new(ServiceType::WhoTalkie, "wt_bridge").remote("10.0.0.2", 9000));
//!
//! let mut hub = Hub::new(config)?;
//! hub.start().await?;
//! # hub.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic, rust_2018_idioms)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
)]

mod config;
pub mod constants;
pub(crate) mod endpoint;
pub mod error;
mod frame;
pub mod hub;
pub mod resample;
pub mod transcode;
pub mod usrp;

pub use crate::{
    config::{Config, ConfigError, Protocol, RoutingMode, ServiceConfig, ServiceType},
    endpoint::ClientChannels,
    frame::{pcm_rms, AudioFormat, AudioFrame},
    hub::{stats::StatsSnapshot, DtmfEvent, Hub, StartError},
};
