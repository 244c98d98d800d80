//! [`InferenceEngine`](crate::engine::InferenceEngine) の実装

pub mod null;
#[cfg(feature = "tract")]
pub mod tract;

pub use null::NullEngine;
#[cfg(feature = "tract")]
pub use self::tract::TractEngine;
