//! Event system for pipeline lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe a run. The
//! orchestrator and the invoker emit events when a run starts, when each
//! execution group and stage starts and ends, when a backend attempt is
//! retried, and when a reply has been parsed. Users can implement
//! [`EventHandler`] to receive these for progress tracking or UIs.
//!
//! Events complement the `tracing` output; they are not a replacement for it.

use crate::error::FailureKind;
use crate::record::ParseTier;
use std::sync::Arc;
use uuid::Uuid;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A run has started.
    RunStart {
        run_id: Uuid,
        /// Number of stages in the pipeline.
        stages: usize,
    },
    /// An execution group is being dispatched.
    GroupStart {
        /// Position of the group in execution order (0-based).
        index: usize,
        /// Stage identities in the group.
        stages: Vec<String>,
    },
    /// A stage has started (before pacing and invocation).
    StageStart {
        stage: String,
    },
    /// A backend attempt failed and will be retried.
    InvocationRetry {
        stage: String,
        /// The upcoming attempt number (1-indexed).
        attempt: u32,
        /// Class of the failure that triggered the retry.
        kind: FailureKind,
        /// Delay before the upcoming attempt in milliseconds.
        delay_ms: u64,
        reason: String,
    },
    /// A reply was turned into a record.
    StageParsed {
        stage: String,
        tier: ParseTier,
        sections: usize,
        items: usize,
    },
    /// A stage has finished.
    StageEnd {
        stage: String,
        ok: bool,
        elapsed_ms: u64,
    },
    /// A run has finished, successfully or not.
    RunEnd {
        run_id: Uuid,
        ok: bool,
        elapsed_ms: u64,
    },
}

/// Handler for pipeline lifecycle events.
///
/// This is entirely optional -- pipelines work without an event handler.
///
/// # Example
///
/// ```
/// use strategy_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::StageStart { stage } => println!("[start] {}", stage),
///             Event::StageEnd { stage, ok, .. } => println!("[end] {} ok={}", stage, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called synchronously when an event is emitted. Keep it cheap.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use strategy_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::StageEnd { stage, elapsed_ms, .. } = event {
///         println!("{} took {} ms", stage, elapsed_ms);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
