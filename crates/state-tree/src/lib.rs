//! state-tree: ordered configuration tree used as the persisted state format
//!
//! A document is a compound of named nodes; each node is an integer leaf, a string leaf or
//! another compound. The text form is ALSA-config style: `key value`, `key { ... }`, dotted
//! keys (`state.PCH.control.1 { ... }`), `[ ... ]` arrays and `#` comments.

mod error;
pub use error::{Result, TreeError};

mod node;
pub use node::{Node, NodeKind, Value};

mod text;
