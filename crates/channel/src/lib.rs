//! Collaborator seams for the gateway core.
//!
//! The wire-protocol client, device credential store, and CRM integration
//! are consumed through the traits here; the gateway never depends on a
//! concrete protocol library. Raw inbound events are modeled as an enum at
//! this boundary so downstream logic never sees library types.

pub mod event;
pub mod plugin;

pub use {
    event::{PairingEvent, RawEvent, RawExtendedText, RawMedia, RawMessage, RawReceipt},
    plugin::{
        ClientFactory, ClientHealthSnapshot, CrmBridge, DeviceIdentity, DeviceStore,
        ProtocolClient,
    },
};
