//! Hierarchical, leak-tracking memory accounting.
//!
//! Contexts form a tree rooted at `ContextId::ROOT`. Two atomics per
//! context (`amount_allocated`, `allocation_count`) can be read lock-free;
//! everything else — the context table's freelist, and the per-call-site
//! trace map — is serialized by a single mutex. The tracker's own internal
//! allocations run through a context with tracking disabled, which turns
//! `record` on that context into a pair of atomic adds with no map access,
//! breaking the reentrancy that would otherwise occur when the tracker
//! grows its own bookkeeping structures.

use crate::allocator::CallSite;
use crate::ids::ContextId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

const MAX_CONTEXTS: usize = 512;

struct Context {
    name: String,
    amount_allocated: AtomicI64,
    allocation_count: AtomicI64,
    parent: ContextId,
    num_children: AtomicU32,
    tracking_enabled: AtomicBool,
    num_traces: AtomicU32,
    /// `false` once destroyed and sitting on the freelist.
    live: AtomicBool,
}

impl Context {
    fn new(name: &str, parent: ContextId) -> Self {
        Self {
            name: name.to_string(),
            amount_allocated: AtomicI64::new(0),
            allocation_count: AtomicI64::new(0),
            parent,
            num_children: AtomicU32::new(0),
            tracking_enabled: AtomicBool::new(true),
            num_traces: AtomicU32::new(0),
            live: AtomicBool::new(true),
        }
    }
}

/// A per-(file, line, context) aggregate of currently live bytes, kept
/// only to locate leaks — not a full allocation ledger.
#[derive(Debug, Clone)]
struct Trace {
    function: &'static str,
    file: &'static str,
    line: u32,
    context: ContextId,
    amount_allocated: i64,
}

/// Copy of a context's counters, returned by the tooling snapshot API.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub name: String,
    pub amount_allocated: i64,
    pub allocation_count: i64,
    pub num_children: u32,
}

/// Copy of a trace entry, returned by the tooling snapshot API.
#[derive(Debug, Clone)]
pub struct TraceSnapshot {
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub context: ContextId,
    pub amount_allocated: i64,
}

struct Inner {
    contexts: Vec<Context>,
    free_contexts: Vec<u32>,
    /// trace-site-key -> index into `traces`
    trace_index: HashMap<u64, usize>,
    traces: Vec<Trace>,
    /// live pointer -> index into `traces`, to untrace on free/resize.
    ptr_index: HashMap<usize, usize>,
}

/// The tracker itself.
pub struct MemoryTracker {
    mutex: Mutex<Inner>,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTracker {
    /// Build a tracker with just the root context (id 0) present.
    pub fn new() -> Self {
        let tracker = Self {
            mutex: Mutex::new(Inner {
                contexts: Vec::new(),
                free_contexts: Vec::new(),
                trace_index: HashMap::new(),
                traces: Vec::new(),
                ptr_index: HashMap::new(),
            }),
        };
        let root = tracker.create_context("root", ContextId::NONE);
        debug_assert_eq!(root, ContextId::ROOT);
        // The root context backs the tracker's own bookkeeping allocations;
        // tracing those would mean `record` touching the trace map while
        // this same tracker might already be growing it, so tracing starts
        // off here and stays off unless a caller opts back in.
        tracker.toggle_tracking(root, false);
        tracker
    }

    /// Create a context named `name` under `parent` (or `ContextId::NONE`
    /// for a root-less context, used only for the tracker's own internal
    /// bookkeeping context). Tracking starts enabled.
    pub fn create_context(&self, name: &str, parent: ContextId) -> ContextId {
        let mut inner = self.mutex.lock().unwrap();

        let id = if let Some(reused) = inner.free_contexts.pop() {
            inner.contexts[reused as usize] = Context::new(name, parent);
            reused
        } else {
            assert!(
                inner.contexts.len() < MAX_CONTEXTS,
                "too many memory tracker contexts (max {MAX_CONTEXTS})"
            );
            inner.contexts.push(Context::new(name, parent));
            (inner.contexts.len() - 1) as u32
        };

        if !parent.is_none() {
            inner.contexts[parent.as_usize()]
                .num_children
                .fetch_add(1, Ordering::Relaxed);
        }

        ContextId::new(id)
    }

    /// Disable or enable per-call-site tracing for a context. The
    /// tracker's own context is created with tracking disabled so that
    /// its internal allocations never touch the trace map while already
    /// holding the mutex that map is guarded by.
    pub fn toggle_tracking(&self, id: ContextId, enabled: bool) {
        let inner = self.mutex.lock().unwrap();
        inner.contexts[id.as_usize()]
            .tracking_enabled
            .store(enabled, Ordering::Relaxed);
    }

    /// Record an allocation/free/resize delta against `context`. A no-op
    /// if `context` is `ContextId::NONE`.
    pub fn record(
        &self,
        old_ptr: *mut u8,
        old_size: usize,
        new_ptr: *mut u8,
        new_size: usize,
        site: CallSite,
        context: ContextId,
    ) {
        if context.is_none() {
            return;
        }

        let mut inner = self.mutex.lock().unwrap();
        let delta = new_size as i64 - old_size as i64;
        let count_delta = (new_size > 0) as i64 - (old_size > 0) as i64;

        {
            let c = &inner.contexts[context.as_usize()];
            let updated = c.amount_allocated.fetch_add(delta, Ordering::Relaxed) + delta;
            c.allocation_count.fetch_add(count_delta, Ordering::Relaxed);
            debug_assert!(updated >= 0, "memory tracker byte count went negative");
        }

        let tracking_enabled =
            inner.contexts[context.as_usize()].tracking_enabled.load(Ordering::Relaxed);
        let has_traces = inner.contexts[context.as_usize()].num_traces.load(Ordering::Relaxed) > 0;

        if old_size > 0 && (tracking_enabled || has_traces) {
            self.untrace_locked(&mut inner, old_ptr, old_size as i64, context);
        }
        if new_size > 0 && tracking_enabled {
            self.trace_locked(&mut inner, new_ptr, new_size as i64, site, context);
        }
    }

    fn trace_locked(&self, inner: &mut Inner, ptr: *mut u8, size: i64, site: CallSite, context: ContextId) {
        let key = site_key(site, context);
        let idx = *inner.trace_index.entry(key).or_insert_with(|| {
            inner.traces.push(Trace {
                function: site.function,
                file: site.file,
                line: site.line,
                context,
                amount_allocated: 0,
            });
            inner.traces.len() - 1
        });
        inner.traces[idx].amount_allocated += size;
        inner.ptr_index.insert(ptr as usize, idx);
        inner.contexts[context.as_usize()]
            .num_traces
            .fetch_add(1, Ordering::Relaxed);
    }

    fn untrace_locked(&self, inner: &mut Inner, ptr: *mut u8, size: i64, context: ContextId) {
        if let Some(idx) = inner.ptr_index.remove(&(ptr as usize)) {
            inner.traces[idx].amount_allocated -= size;
            inner.contexts[context.as_usize()]
                .num_traces
                .fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Destroy a context. If it still has live bytes, dump its traces as a
    /// leak diagnostic first; live children are also reported, then the
    /// slot is cleared and pushed onto the freelist.
    pub fn destroy_context(&self, id: ContextId) {
        let (amount, tracking_enabled, num_children, parent) = {
            let inner = self.mutex.lock().unwrap();
            let c = &inner.contexts[id.as_usize()];
            (
                c.amount_allocated.load(Ordering::Relaxed),
                c.tracking_enabled.load(Ordering::Relaxed),
                c.num_children.load(Ordering::Relaxed),
                c.parent,
            )
        };

        if amount > 0 && tracking_enabled {
            self.dump_leaks(id);
        }
        if amount > 0 {
            crate::kprint::log_warn(&format!(
                "memory tracker: context {id} destroyed with {amount} bytes still live"
            ));
        }
        if num_children > 0 {
            crate::kprint::log_warn(&format!(
                "memory tracker: context {id} destroyed with {num_children} live children"
            ));
        }

        let mut inner = self.mutex.lock().unwrap();
        inner.contexts[id.as_usize()].live.store(false, Ordering::Relaxed);
        inner.contexts[id.as_usize()]
            .amount_allocated
            .store(0, Ordering::Relaxed);
        inner.free_contexts.push(id.as_u32());
        if !parent.is_none() {
            inner.contexts[parent.as_usize()]
                .num_children
                .fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn dump_leaks(&self, context: ContextId) {
        let inner = self.mutex.lock().unwrap();
        for t in inner.traces.iter() {
            if t.context == context && t.amount_allocated > 0 {
                crate::kprint::log_warn(&format!(
                    "leaked {} bytes in {} at {}:{}",
                    t.amount_allocated, t.function, t.file, t.line
                ));
            }
        }
    }

    /// Scan all live contexts except the root/tracker-internal ones and
    /// report any with nonzero live bytes. Returns the number of leaking
    /// contexts found.
    pub fn check_for_leaks(&self) -> usize {
        let inner = self.mutex.lock().unwrap();
        let mut leaks = 0;
        for (i, c) in inner.contexts.iter().enumerate() {
            if !c.live.load(Ordering::Relaxed) {
                continue;
            }
            let amount = c.amount_allocated.load(Ordering::Relaxed);
            if amount > 0 {
                leaks += 1;
                crate::kprint::log_warn(&format!(
                    "leak check: context {i} ({}) has {amount} live bytes",
                    c.name
                ));
            }
        }
        leaks
    }

    /// Snapshot a single context's counters (for tests/tooling).
    pub fn snapshot_context(&self, id: ContextId) -> Option<ContextSnapshot> {
        let inner = self.mutex.lock().unwrap();
        inner.contexts.get(id.as_usize()).map(|c| ContextSnapshot {
            name: c.name.clone(),
            amount_allocated: c.amount_allocated.load(Ordering::Relaxed),
            allocation_count: c.allocation_count.load(Ordering::Relaxed),
            num_children: c.num_children.load(Ordering::Relaxed),
        })
    }

    /// Snapshot every live trace (for tests/tooling), taken under the
    /// tracker mutex.
    pub fn snapshot_traces(&self) -> Vec<TraceSnapshot> {
        let inner = self.mutex.lock().unwrap();
        inner
            .traces
            .iter()
            .filter(|t| t.amount_allocated > 0)
            .map(|t| TraceSnapshot {
                function: t.function,
                file: t.file,
                line: t.line,
                context: t.context,
                amount_allocated: t.amount_allocated,
            })
            .collect()
    }
}

fn site_key(site: CallSite, context: ContextId) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    site.file.hash(&mut hasher);
    site.line.hash(&mut hasher);
    context.as_u32().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CallSite;

    fn site() -> CallSite {
        CallSite {
            function: "test",
            file: "tracker.rs",
            line: 1,
        }
    }

    #[test]
    fn record_idempotent_same_size() {
        let t = MemoryTracker::new();
        let ctx = t.create_context("c", ContextId::ROOT);
        let p1 = 0x1000 as *mut u8;
        t.record(std::ptr::null_mut(), 0, p1, 64, site(), ctx);
        let before = t.snapshot_context(ctx).unwrap().amount_allocated;
        t.record(p1, 64, p1, 64, site(), ctx);
        let after = t.snapshot_context(ctx).unwrap().amount_allocated;
        assert_eq!(before, after);
    }

    #[test]
    fn child_cleanup_leaves_parent_unchanged() {
        let t = MemoryTracker::new();
        let parent = t.create_context("parent", ContextId::ROOT);
        let child = t.create_context("child", parent);
        let p = 0x2000 as *mut u8;
        t.record(std::ptr::null_mut(), 0, p, 64, site(), child);
        t.record(p, 64, std::ptr::null_mut(), 0, site(), child);
        let before = t.snapshot_context(parent).unwrap().amount_allocated;
        t.destroy_context(child);
        let after = t.snapshot_context(parent).unwrap().amount_allocated;
        assert_eq!(before, after);
        assert_eq!(t.snapshot_context(parent).unwrap().num_children, 0);
    }

    #[test]
    fn leak_detected_on_check() {
        let t = MemoryTracker::new();
        let child = t.create_context("leaky", ContextId::ROOT);
        let p = 0x3000 as *mut u8;
        t.record(std::ptr::null_mut(), 0, p, 64, site(), child);
        assert_eq!(t.check_for_leaks(), 1);
        let traces = t.snapshot_traces();
        assert!(traces.iter().any(|tr| tr.context == child && tr.amount_allocated == 64));
    }

    #[test]
    fn context_none_is_never_recorded() {
        let t = MemoryTracker::new();
        t.record(std::ptr::null_mut(), 0, 0x4000 as *mut u8, 64, site(), ContextId::NONE);
        assert_eq!(t.check_for_leaks(), 0);
    }

    #[test]
    fn root_context_starts_with_tracking_disabled() {
        let t = MemoryTracker::new();
        let p = 0x5000 as *mut u8;
        t.record(std::ptr::null_mut(), 0, p, 64, site(), ContextId::ROOT);
        // Byte/count atomics still move...
        assert_eq!(t.snapshot_context(ContextId::ROOT).unwrap().amount_allocated, 64);
        // ...but no trace was recorded, since tracking is off for this context.
        assert!(t.snapshot_traces().iter().all(|tr| tr.context != ContextId::ROOT));
    }

    #[test]
    fn toggle_tracking_reenables_trace_recording() {
        let t = MemoryTracker::new();
        t.toggle_tracking(ContextId::ROOT, true);
        let p = 0x6000 as *mut u8;
        t.record(std::ptr::null_mut(), 0, p, 64, site(), ContextId::ROOT);
        assert!(t
            .snapshot_traces()
            .iter()
            .any(|tr| tr.context == ContextId::ROOT && tr.amount_allocated == 64));
    }
}
