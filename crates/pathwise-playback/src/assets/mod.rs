//! Narration and illustration assets:
//! - [`style`]: node kind to voice/style mapping and asset keys
//! - [`cache`]: TTL cache of generated bytes
//! - [`pipeline`]: bounded, coalesced, retried generation
//! - [`prefetch`]: worker pool running lookahead prefetches

pub mod cache;
pub mod pipeline;
pub mod prefetch;
pub mod style;

pub use cache::AssetCache;
pub use pipeline::{AssetPipeline, AssetStatus, DeliveryMode, NodeAssetReport, PrefetchReport};
pub use prefetch::{CancelHandle, CancelToken, PrefetchQueue, PrefetchTicket};
pub use style::{params_for, requests_for, AssetKey, AssetKind, AssetRequest, GenerationParams};
