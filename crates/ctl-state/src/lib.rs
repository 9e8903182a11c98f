//! ctl-state: store and restore sound-card control state
//!
//! Every control of a card is captured into a `state.<card id>.control.<numid>` subtree
//! of a [`state_tree::Node`] document, with a human-readable `comment` describing its
//! type, range and items. Restoring resolves each stored control against the live card
//! (by numid, then by identity tuple) and writes the decoded value back. A missing control
//! whose comment marks it `user` is created again from the stored type, range and items.

mod error;
pub use error::{Result, StateError};

mod model;
pub use model::{
    access_string, id_mismatches, ids_equal, parse_range, range_string, type_compatible, IdField,
};

mod resolve;
pub use resolve::{resolve, Resolution};

mod encode;
pub use encode::{encode_control, hex_string};

mod decode;
pub use decode::{
    decode_control, decode_value, parse_control, parse_hex, MismatchPolicy, RestoreOptions,
    RestoreStatus, Restored, StoredControl,
};

mod card;
pub use card::{
    find_card_state, restore_card, save_card, CardOutcome, CardStatus, Operation, Report,
};

mod persist;
pub use persist::{
    load_document, restore_state, save_state, select_cards, write_document, DEFAULT_STATE_FILE,
};

mod metrics;
pub use metrics::{MetricsHub, StateMetrics};
