//! BSON ordering, the on-disk node layout, and the B+tree index built on
//! top of them (C11/C12).

pub mod index;
pub mod key;
pub mod node;

pub use index::{BTreeIndex, DEFAULT_MAX_KEYS};
pub use key::{compare_bson, extract_key, IndexKey, TypeRank};
pub use node::BTreeNode;
