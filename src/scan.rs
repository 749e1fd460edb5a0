//! Table scanning: the parent key loader, the lazy child scanner, and the
//! orphan predicate that classifies each child record.

pub mod children;
pub(crate) mod pager;
pub mod parents;
pub mod predicate;

pub use children::{ChildRecord, ChildScanner};
pub use parents::{load_parent_keys, ParentKeySet};
pub use predicate::{classify, is_orphan, StalenessCutoff, Verdict};
