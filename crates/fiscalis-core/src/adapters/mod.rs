//! Provider client implementations.
//!
//! | Client | Mode | Description |
//! |--------|------|-------------|
//! | [`HttpProviderClient`] | `live` | Authenticated HTTP pipeline with cache, rate limit, retry and circuit breaker |
//! | [`SimulatedProvider`] | `simulated` | Deterministic generated payloads, no network |

mod http;
mod simulated;
pub mod template;

pub use http::HttpProviderClient;
pub use simulated::SimulatedProvider;
