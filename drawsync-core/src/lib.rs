//! # drawsync-core: paged diagram model, codec and patch engine
//!
//! Everything here is independent of the replication layer: the host's
//! page tree, the markup codec, typed patches, and the ordering rules that
//! both the replicated document and plain in-memory models apply.
//!
//! ## Architecture
//!
//! ```text
//!  markup ──► codec::decode ──► FileDocument { pages: [Page { shapes }] }
//!                                     │
//!             diff::diff_pages(prev, curr)
//!                                     ▼
//!                               FilePatch  ◄──► JSON wire { r, i, u }
//!                                     │
//!               apply::apply_patch(&mut impl PatchTarget, &patch)
//!                                     │
//!                        order::{plan_inserts, insert_after_unique}
//!                                     ▼
//!                     LiveModel / replicated document
//! ```
//!
//! ## Modules
//!
//! - [`model`]: pages, shapes, attributes
//! - [`codec`]: markup ⇄ model, page payloads for inserts
//! - [`patch`]: typed patch, wire form, builder
//! - [`order`]: anchor resolution, insertion planning, order diff
//! - [`apply`]: generic patch applier and the in-memory target
//! - [`diff`]: patch between two page-list snapshots

pub mod apply;
pub mod codec;
pub mod diff;
pub mod error;
pub mod model;
pub mod order;
pub mod patch;

pub use apply::{apply_patch, apply_to_pages, ApplyReport, LiveModel, PatchTarget, Scope, Skipped, SkippedOp};
pub use codec::{decode, decode_page, encode, encode_page};
pub use diff::diff_pages;
pub use error::{CodecError, PatchError};
pub use model::{Attributes, FileDocument, Page, RootKind, Shape, GEOMETRY_KEY};
pub use order::{diff_order, Downgrade, OrderDiff, OrderedIds};
pub use patch::{
    Anchor, CellInsert, CellOp, CellUpdate, CellsBuilder, FilePatch, PageInsert, PageOp,
    PageUpdate, PatchBuilder,
};
