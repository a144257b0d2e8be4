//! STENCIL Sync - Conflict-Safe Template Writers
//!
//! Two classes of writer share every template record:
//!
//! - **Live** callers go through [`UpdateCoordinator`], which retries
//!   version conflicts with exponential backoff until the change commits or
//!   the attempt and time budgets run out.
//! - The **background** writer ([`BackgroundProcessor`]) recomputes derived
//!   fields and stays out of the way of recent live edits.
//!
//! Both share one retry state machine ([`retry::RetryLoop`]) and invalidate
//! the cache entry of every record they commit. [`TemplateService`] bundles
//! them with a read-through cache behind one client-facing type.
//!
//! # Example
//!
//! ```ignore
//! let service = TemplateService::in_memory(StencilConfig::from_env())?;
//! let result = service
//!     .update_template(&id, TemplatePatch::new().name("Intake v2"), None)
//!     .await?;
//! assert_eq!(service.get_template(&id).await?.map(|t| t.version), Some(result.new_version));
//! ```

pub mod background;
pub mod backoff;
pub mod coordinator;
pub mod retry;
pub mod service;
pub mod telemetry;

pub use background::{
    background_sweep_task, BackgroundMetrics, BackgroundMetricsSnapshot, BackgroundProcessor,
};
pub use backoff::BackoffSchedule;
pub use coordinator::UpdateCoordinator;
pub use retry::{RetryLoop, Step, Terminal};
pub use service::{InMemoryTemplateService, TemplateService};
pub use telemetry::{init_tracing, LogFormat, TelemetryError};
