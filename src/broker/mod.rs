//! Broker Module
//!
//! Client-facing side of scatter-gather.
//!
//! ## Submodules
//! - **`scatter`**: generic `ScatterGather<Req, Res>` engine (dispatch, deadline, merge).
//! - **`customize`**: `RequestCustomizer` hook; widens the window and facet sizes.
//! - **`transport`**: `NodeTransport` with HTTP and in-process implementations.
//! - **`broker`**: document search (`browse` / `try_browse`).
//! - **`info`**: cluster statistics over the same engine.
//! - **`handlers`**: axum handlers for `/search` and `/cluster/info`.

pub mod broker;
pub mod customize;
pub mod handlers;
pub mod info;
pub mod scatter;
pub mod transport;

#[cfg(test)]
mod tests;
