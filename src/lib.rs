//! cratelink: device link and provisioning protocol engine for Crate hub
//! hardware.
//!
//! The crate layers one command/response protocol over two unreliable
//! transports (BLE and serial/USB): transports feed a frame codec, a command
//! channel correlates calls to responses under bounded timeouts, and a link
//! session owns the connection lifecycle including the post-boot privileged-
//! mode window. Provisioning and bulk tag-writing flows drive the session
//! and gate persistence on schema validation of device-reported payloads.

pub mod channel;
pub mod codec;
pub mod commands;
pub mod link;
pub mod provision;
pub mod schema;
pub mod tagwrite;
pub mod transport;
