//! HTTP API over the migration engine
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 API Server                   │
//! │                                              │
//! │  POST /api/discovery        → 202 progress   │
//! │  GET  /api/jobs/{id}        → progress       │
//! │  POST /api/jobs/{id}/cancel → 202 / 404      │
//! │  /api/repositories, /api/batches, analytics  │
//! │  GET  /metrics              → prometheus     │
//! └──────────────────────────────────────────────┘
//!                       │
//!     DiscoveryService / LifecycleCoordinator
//!                       │
//!                 JobSupervisor
//! ```

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use handlers::{create_router, ApiResponse};
pub use server::{ApiServer, AppState, ServerError};
