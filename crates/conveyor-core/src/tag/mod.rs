//! Image tags and the Build → Deploy tag handoff.
//!
//! Build generates a timestamp tag, pushes `{registry}/{repository}:{tag}` and
//! publishes a [`TagHandoff`]; Deploy resolves the tag back through the same
//! [`TagKey`] derivation. Reader and writer never format the key themselves.

pub mod handoff;
pub mod image;
pub mod key;

pub use handoff::{normalize_tag_value, ResolvedTag, TagExchange, TagHandoff};
pub use image::{ImageRef, ImageTag, TagGenerator, TAG_FORMAT};
pub use key::{TagKey, TagScope};
