//! Client for the DLive GraphQL API.
//!
//! Resolves a past-broadcast reference to its stream metadata (title, owner,
//! duration, master playlist URL) and lists a channel's recent broadcasts.
//! The query shapes are fixed; responses are decoded into explicit structs
//! and anything unexpected surfaces as [`ApiError::Upstream`].

pub mod broadcast;
pub mod client;
pub mod error;
pub mod models;

pub use broadcast::{BroadcastMetadata, BroadcastRef, RecentBroadcast};
pub use client::{BroadcastResolver, MetadataClient, GRAPHQL_ENDPOINT};
pub use error::ApiError;
