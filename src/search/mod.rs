//! Search Model Module
//!
//! Types shared by every layer of scatter-gather execution.
//!
//! ## Overview
//! A `SearchRequest` travels from the broker to every node, each partition
//! answers with a `PartialResult`, and the broker returns one `SearchResult`.
//! Failures never abort a request; they are recorded as `SearchError`
//! entries in the result. Only malformed requests are rejected up front, as
//! a `RequestError`.
//!
//! ## Submodules
//! - **`types`**: requests, hits, facet and group accumulators, results.
//! - **`error`**: result-level error kinds and request validation errors.

pub mod error;
pub mod types;
