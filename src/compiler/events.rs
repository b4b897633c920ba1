//! Event logging for the inlining engine.
//!
//! Every decision the engine takes (a call inlined, a call site rejected, a method made
//! static) is recorded as an [`Event`]. Statistics are derived from the log instead of
//! being tracked separately, so the counters can never disagree with what was recorded.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded decision or diagnostic
//! - [`EventLog`] - Append-only, thread-safe collection of events
//! - [`EventBuilder`] - Fluent API for creating events, committing on drop
//! - [`InlinerStats`] - Counters derived from a log
//!
//! # Example
//!
//! ```rust
//! use redex::compiler::{EventKind, EventLog, InlinerStats};
//! use redex::model::DexContext;
//!
//! let ctx = DexContext::new();
//! let caller = ctx.make_method_from_str("LA;.bar:()I")?;
//! let callee = ctx.make_method_from_str("LA;.foo:(I)I")?;
//!
//! let log = EventLog::new();
//! log.record(EventKind::CallInlined)
//!     .method(caller)
//!     .callee(callee)
//!     .message("inlined at block 0");
//!
//! let stats = InlinerStats::from_log(&log);
//! assert_eq!(stats.calls_inlined, 1);
//! assert_eq!(stats.inlined, 1);
//! # Ok::<(), redex::Error>(())
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::{compiler::Rejection, model::DexMethodRef};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A call site was replaced by the callee's body.
    CallInlined,
    /// A call site was replaced by a partial copy of the callee.
    PartialInline,
    /// The callee of an inlined call had several return points.
    MultipleReturns,
    /// Control flow after a call to a no-return method was cut.
    NoReturnCut,
    /// A constructor fence was emitted after an inlined constructor.
    WriteBarrierInserted,
    /// A final field lost its `final` flag so a constructor could be inlined unfenced.
    FieldUnfinalized,
    /// A private method was rewritten as a static method.
    MethodMadeStatic,
    /// A member's visibility was widened so inlined code can still reach it.
    VisibilityChanged,
    /// A fully inlined callee was scheduled for deletion.
    MethodRemoved,
    /// The shrinker changed a method.
    ShrinkerRun,

    /// A call site was found to be unreachable and skipped.
    UnreachableCallSite,
    /// A call edge closing a recursion cycle was pruned.
    RecursionPruned,
    /// A call site passed every gate but the cost model declined it.
    CallNotInlined,
    /// A call site failed a hard gate.
    Rejected(Rejection),

    /// Something unexpected but recoverable, such as a skipped staticize.
    Warning,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::CallInlined => "call inlined",
            Self::PartialInline => "partial inline",
            Self::MultipleReturns => "multiple returns",
            Self::NoReturnCut => "no-return cut",
            Self::WriteBarrierInserted => "write barrier inserted",
            Self::FieldUnfinalized => "field unfinalized",
            Self::MethodMadeStatic => "method made static",
            Self::VisibilityChanged => "visibility changed",
            Self::MethodRemoved => "method removed",
            Self::ShrinkerRun => "shrinker run",
            Self::UnreachableCallSite => "unreachable call site",
            Self::RecursionPruned => "recursion pruned",
            Self::CallNotInlined => "call not inlined",
            Self::Rejected(reason) => reason.description(),
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (the caller for call-site events).
    pub method: Option<DexMethodRef>,
    /// The callee involved, for call-site events.
    pub callee: Option<DexMethodRef>,
    /// Location within the method (block id).
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Associated shrinker step (if from one).
    pub pass: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the builder is
/// dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<DexMethodRef>,
    callee: Option<DexMethodRef>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            callee: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and location where the event occurred.
    pub fn at(mut self, method: DexMethodRef, location: usize) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets only the method.
    pub fn method(mut self, method: DexMethodRef) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the callee of a call-site event.
    pub fn callee(mut self, callee: DexMethodRef) -> Self {
        self.callee = Some(callee);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a shrinker step.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            method: self.method.take(),
            callee: self.callee.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from an inliner run.
///
/// Events can be appended concurrently from worker threads through shared references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        for (_, event) in &self.events {
            new_log.events.push(event.clone());
        }
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Returns an iterator over events recorded for `method`.
    pub fn filter_method<'a>(
        &'a self,
        method: &'a DexMethodRef,
    ) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.method.as_ref() == Some(method)).then_some(e))
    }

    /// Returns an iterator over the rejections of call sites.
    pub fn rejections(&self) -> impl Iterator<Item = (Rejection, &Event)> + '_ {
        self.events.iter().filter_map(|(_, e)| match e.kind {
            EventKind::Rejected(reason) => Some((reason, e)),
            _ => None,
        })
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Iterator over the events of an [`EventLog`].
pub struct EventLogIter<'a> {
    inner: boxcar::Iter<'a, Event>,
}

impl<'a> Iterator for EventLogIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, e)| e)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = EventLogIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        EventLogIter {
            inner: self.events.iter(),
        }
    }
}

/// Inliner counters derived from an [`EventLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlinerStats {
    /// Distinct callees inlined at least once.
    pub inlined: usize,
    /// Call sites replaced by a callee body.
    pub calls_inlined: usize,
    /// Call sites rejected by a hard gate.
    pub calls_not_inlinable: usize,
    /// Call sites the cost model declined.
    pub calls_not_inlined: usize,
    /// Calls to no-return methods whose continuation was cut.
    pub no_returns: usize,
    /// Call sites skipped as unreachable.
    pub unreachable_call_sites: usize,
    /// Call edges pruned to break recursion.
    pub recursive: usize,
    /// Rejections for referencing a type of a store the caller may not see.
    pub cross_store: usize,
    /// Rejections for throwing code moving into an uncovered synchronized region.
    pub cannot_inline_sketchy_code: usize,
    /// Rejections for a callee requiring a higher API level than the caller.
    pub api_level_mismatch: usize,
    /// Rejections for blocklisted callers or callees.
    pub blocklisted: usize,
    /// Rejections for callers that would grow past the size limit.
    pub caller_too_large: usize,
    /// Rejections for callees too large to inline anywhere.
    pub callee_too_big: usize,
    /// Rejections for callees without a resolvable body.
    pub not_found: usize,
    /// Rejections for callees containing `throw`.
    pub throws: usize,
    /// Inlined callees with several return points.
    pub multiple_returns: usize,
    /// Rejections of constructors that cannot be inlined safely.
    pub cannot_inline_init: usize,
    /// Rejections for callees with calls that cannot be made from the caller.
    pub unknown_virtual: usize,
    /// Rejections for callees accessing fields that do not resolve.
    pub unknown_field: usize,
    /// Rejections for callees with `invoke-super` that cannot be relocated.
    pub non_relocatable_super: usize,
    /// Rejections for callees whose `invoke-direct` would need a virtual dispatch.
    pub creates_virtual_dispatch: usize,
    /// Rejections for callees reading the platform version.
    pub android_version_check: usize,
    /// Rejections for callees catching a non-public external type.
    pub non_public_catch: usize,
    /// Rejections for callees that would add references to the caller's dex.
    pub intradex_violation: usize,
    /// Rejections for cold callees growing hot callers.
    pub hot_cold_mismatch: usize,
    /// Rejections for callers marked as not optimizable.
    pub no_optimizations: usize,
    /// Constructor fences emitted.
    pub write_barriers: usize,
    /// Methods rewritten as static.
    pub methods_made_static: usize,
    /// Members whose visibility was widened.
    pub visibility_changes: usize,
    /// Callees scheduled for deletion.
    pub methods_removed: usize,
    /// Call sites partially inlined.
    pub partial_inlines: usize,
    /// Methods changed by the shrinker.
    pub shrinker_runs: usize,
    /// Depth of the deepest chain in the pruned call graph.
    pub max_call_stack_depth: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl InlinerStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);
        let rejected = |reason: Rejection| get(EventKind::Rejected(reason));

        let inlined = log
            .filter_kind(EventKind::CallInlined)
            .filter_map(|e| e.callee.as_ref())
            .collect::<HashSet<_>>()
            .len();

        Self {
            inlined,
            calls_inlined: get(EventKind::CallInlined),
            calls_not_inlinable: log.rejections().count(),
            calls_not_inlined: get(EventKind::CallNotInlined),
            no_returns: get(EventKind::NoReturnCut),
            unreachable_call_sites: get(EventKind::UnreachableCallSite),
            recursive: get(EventKind::RecursionPruned),
            cross_store: rejected(Rejection::CrossStore),
            cannot_inline_sketchy_code: rejected(Rejection::SketchyCode),
            api_level_mismatch: rejected(Rejection::ApiLevelMismatch),
            blocklisted: rejected(Rejection::Blocklisted),
            caller_too_large: rejected(Rejection::CallerTooLarge),
            callee_too_big: rejected(Rejection::CalleeTooBig),
            not_found: rejected(Rejection::NotFound),
            throws: rejected(Rejection::Throws),
            multiple_returns: get(EventKind::MultipleReturns),
            cannot_inline_init: rejected(Rejection::CannotInlineInit),
            unknown_virtual: rejected(Rejection::UnknownVirtual),
            unknown_field: rejected(Rejection::UnknownField),
            non_relocatable_super: rejected(Rejection::NonRelocatableSuper),
            creates_virtual_dispatch: rejected(Rejection::CreatesVirtualDispatch),
            android_version_check: rejected(Rejection::AndroidVersionCheck),
            non_public_catch: rejected(Rejection::NonPublicCatch),
            intradex_violation: rejected(Rejection::IntraDex),
            hot_cold_mismatch: rejected(Rejection::HotColdMismatch),
            no_optimizations: rejected(Rejection::NoOptimizations),
            write_barriers: get(EventKind::WriteBarrierInserted),
            methods_made_static: get(EventKind::MethodMadeStatic),
            visibility_changes: get(EventKind::VisibilityChanged),
            methods_removed: get(EventKind::MethodRemoved),
            partial_inlines: get(EventKind::PartialInline),
            shrinker_runs: get(EventKind::ShrinkerRun),
            max_call_stack_depth: 0,
            total_time: Duration::ZERO,
        }
    }

    /// Sets the depth of the deepest call chain.
    #[must_use]
    pub fn with_max_call_stack_depth(mut self, depth: usize) -> Self {
        self.max_call_stack_depth = depth;
        self
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.calls_inlined > 0 {
            parts.push(format!(
                "{} calls inlined ({} callees)",
                self.calls_inlined, self.inlined
            ));
        }
        if self.partial_inlines > 0 {
            parts.push(format!("{} partial", self.partial_inlines));
        }
        if self.calls_not_inlinable > 0 {
            parts.push(format!("{} not inlinable", self.calls_not_inlinable));
        }
        if self.calls_not_inlined > 0 {
            parts.push(format!("{} declined", self.calls_not_inlined));
        }
        if self.no_returns > 0 {
            parts.push(format!("{} no-return cuts", self.no_returns));
        }
        if self.methods_removed > 0 {
            parts.push(format!("{} removed", self.methods_removed));
        }
        if self.methods_made_static > 0 {
            parts.push(format!("{} made static", self.methods_made_static));
        }
        if self.write_barriers > 0 {
            parts.push(format!("{} write barriers", self.write_barriers));
        }

        let stats = if parts.is_empty() {
            "nothing inlined".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!(
                "{} in {:?} (max depth {})",
                stats, self.total_time, self.max_call_stack_depth
            )
        } else {
            stats
        }
    }
}

impl fmt::Display for InlinerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DexContext;

    fn method(ctx: &DexContext, name: &str) -> DexMethodRef {
        ctx.make_method_from_str(&format!("LA;.{name}:()V")).unwrap()
    }

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert!(!log.has(EventKind::CallInlined));
    }

    #[test]
    fn test_record_event() {
        let ctx = DexContext::new();
        let log = EventLog::new();
        let caller = method(&ctx, "bar");

        log.record(EventKind::CallInlined)
            .at(caller.clone(), 3)
            .callee(method(&ctx, "foo"))
            .message("inlined foo");

        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.method, Some(caller));
        assert_eq!(event.location, Some(3));
        assert_eq!(event.message, "inlined foo");
    }

    #[test]
    fn test_default_message() {
        let log = EventLog::new();
        log.record(EventKind::Rejected(Rejection::CrossStore));
        let event = log.iter().next().unwrap();
        assert_eq!(event.message, Rejection::CrossStore.description());
    }

    #[test]
    fn test_filter_by_method_and_rejection() {
        let ctx = DexContext::new();
        let a = method(&ctx, "a");
        let b = method(&ctx, "b");
        let log = EventLog::new();
        log.record(EventKind::CallInlined).method(a.clone());
        log.record(EventKind::ShrinkerRun).method(b.clone());
        log.record(EventKind::Rejected(Rejection::Throws)).method(a.clone()).callee(b);

        assert_eq!(log.filter_method(&a).count(), 2);
        let rejections: Vec<Rejection> = log.rejections().map(|(r, _)| r).collect();
        assert_eq!(rejections, vec![Rejection::Throws]);
        assert_eq!((&log).into_iter().count(), 3);
    }

    #[test]
    fn test_stats_from_log() {
        let ctx = DexContext::new();
        let caller = method(&ctx, "bar");
        let foo = method(&ctx, "foo");
        let log = EventLog::new();

        log.record(EventKind::CallInlined)
            .method(caller.clone())
            .callee(foo.clone());
        log.record(EventKind::CallInlined).method(caller.clone()).callee(foo);
        log.record(EventKind::Rejected(Rejection::CrossStore))
            .method(caller.clone());
        log.record(EventKind::Rejected(Rejection::SketchyCode))
            .method(caller);
        log.record(EventKind::RecursionPruned);

        let stats = InlinerStats::from_log(&log).with_max_call_stack_depth(2);
        assert_eq!(stats.inlined, 1);
        assert_eq!(stats.calls_inlined, 2);
        assert_eq!(stats.calls_not_inlinable, 2);
        assert_eq!(stats.cross_store, 1);
        assert_eq!(stats.cannot_inline_sketchy_code, 1);
        assert_eq!(stats.recursive, 1);
        assert_eq!(stats.max_call_stack_depth, 2);
        assert!(stats.summary().contains("2 calls inlined"));
    }

    #[test]
    fn test_thread_safe_append() {
        use std::{sync::Arc, thread};

        let log = Arc::new(EventLog::new());
        let mut handles = vec![];
        for i in 0..4 {
            let log = Arc::clone(&log);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    log
                        .record(EventKind::ShrinkerRun)
                        .message(format!("thread {i} event {j}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }
}
