//! ctl-transport: control-interface abstractions for sound cards
//!
//! This crate provides the types and traits used to list, describe, read and write the
//! controls of a sound card. The default build enables a `mock` backend, backed by YAML
//! card descriptors, so that binaries and tests run on any host without native drivers.

mod types;
pub use types::{
    Access, CardInfo, CardMask, ControlId, ControlInfo, ControlValue, ElemAddr, ElemType, Iface,
};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{CardProvider, ControlDevice};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{
    load_card_file, load_cards_dir, save_card_file, MockCard, MockCardDesc, MockControl,
    MockControlDesc, MockSystem,
};
