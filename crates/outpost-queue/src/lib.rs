// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue processing for the Outpost delivery queue.
//!
//! - [`QueueProcessor`] claims ready jobs on a timer and dispatches them
//!   through the delivery channel under a concurrency budget.
//! - [`StallDetector`] reclaims jobs abandoned mid-flight.
//! - [`RetentionSweeper`] deletes finished jobs past the retention window.
//! - [`QueueService`] is the submit/query/control facade.

pub mod dispatch;
pub mod events;
pub mod processor;
pub mod retention;
pub mod service;
pub mod shutdown;
pub mod stall;

pub use events::QueueEvent;
pub use processor::{ConfigUpdate, ProcessorStats, QueueProcessor};
pub use retention::RetentionSweeper;
pub use service::QueueService;
pub use stall::{STALLED_REASON, StallDetector, SweepReport};
