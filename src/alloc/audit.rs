//! Consistency check over every span list of a heap.

use core::fmt;
use std::collections::HashSet;

use serde::Serialize;

use super::heap::Heap;
use super::span::{SpanList, SpanOwner, SpanRef, SpanState};
use crate::constants::{MAX_MHEAP_LIST, NUM_SIZE_CLASSES, PAGE_SIZE};

/// Span counts per container, produced by [`Heap::audit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Spans on the page-heap free lists.
    pub free_spans: usize,
    /// Pages held by those spans.
    pub free_pages: usize,
    /// Large-object spans on the busy lists.
    pub busy_spans: usize,
    /// Spans on central nonempty lists.
    pub nonempty_spans: usize,
    /// Spans on central empty lists.
    pub empty_spans: usize,
    /// Spans held by thread caches.
    pub cached_spans: usize,
    /// In-use spans held directly by a caller rather than any list.
    pub detached_spans: usize,
    /// Stack spans.
    pub stack_spans: usize,
}

/// The first broken invariant found by [`Heap::audit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditError {
    /// Base address of the offending span.
    pub base: usize,
    /// What is wrong with it.
    pub problem: &'static str,
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "span at {:#x}: {}", self.base, self.problem)
    }
}

impl std::error::Error for AuditError {}

struct Walk {
    seen: HashSet<SpanRef>,
    report: AuditReport,
}

impl Walk {
    fn fail(s: SpanRef, problem: &'static str) -> Result<(), AuditError> {
        Err(AuditError { base: s.base(), problem })
    }

    /// Visits every span of `list`, checking what all lists have in common.
    ///
    /// # Safety
    /// The caller holds the lock guarding `list`.
    unsafe fn list(
        &mut self,
        list: &SpanList,
        mut check: impl FnMut(SpanRef) -> Result<(), AuditError>,
    ) -> Result<usize, AuditError> {
        let mut n = 0;
        for s in list.iter() {
            if s.owner() != list.id() {
                Self::fail(s, "owner tag does not name the list holding it")?;
            }
            if !self.seen.insert(s) {
                Self::fail(s, "span appears in more than one list")?;
            }
            check(s)?;
            n += 1;
        }
        Ok(n)
    }
}

impl Heap {
    /// Walks every page-heap and central list and checks that each span is in
    /// exactly one container, that its owner tag names that container, and
    /// that its state fits it.
    ///
    /// Only meaningful while no other thread is using the heap.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn audit(&self) -> Result<AuditReport, AuditError> {
        let mut walk = Walk { seen: HashSet::new(), report: AuditReport::default() };

        let all_spans = {
            let h = self.lock();
            for (npages, list) in h.free.iter().enumerate().chain([(MAX_MHEAP_LIST, &h.free_large)]) {
                // Safety: heap lock held.
                let n = unsafe {
                    walk.list(list, |s| {
                        if s.state() != SpanState::Free {
                            return Walk::fail(s, "span on a free list is not free");
                        }
                        if (npages < MAX_MHEAP_LIST && s.npages() != npages) || s.npages() < npages {
                            return Walk::fail(s, "span on the wrong free list for its size");
                        }
                        for page in 0..s.npages() {
                            if self.span_of(s.base() + page * PAGE_SIZE) != Some(s) {
                                return Walk::fail(s, "page map does not point at free span");
                            }
                        }
                        Ok(())
                    })?
                };
                walk.report.free_spans += n;
            }
            // Safety: heap lock held.
            for s in h.free.iter().chain([&h.free_large]).flat_map(|l| unsafe { l.iter() }) {
                walk.report.free_pages += s.npages();
            }

            for (npages, list) in h.busy.iter().enumerate().chain([(MAX_MHEAP_LIST, &h.busy_large)]) {
                // Safety: heap lock held.
                let n = unsafe {
                    walk.list(list, |s| {
                        if s.state() != SpanState::InUse || s.size_class() != 0 {
                            return Walk::fail(s, "span on a busy list is not a large object");
                        }
                        if (npages < MAX_MHEAP_LIST && s.npages() != npages) || s.npages() < npages {
                            return Walk::fail(s, "span on the wrong busy list for its size");
                        }
                        Ok(())
                    })?
                };
                walk.report.busy_spans += n;
            }
            h.all_spans.clone()
        };

        for class in 1..NUM_SIZE_CLASSES {
            let lists = self.central(class).lock();
            let check = |s: SpanRef| {
                if s.state() != SpanState::InUse || s.size_class() != class {
                    return Walk::fail(s, "central list holds a span of another class");
                }
                if s.in_cache() {
                    return Walk::fail(s, "span on a central list is marked cached");
                }
                Ok(())
            };
            // Safety: central lock held.
            let nonempty = unsafe {
                walk.list(&lists.nonempty, |s| {
                    check(s)?;
                    if s.free_count() == 0 {
                        return Walk::fail(s, "span on nonempty list has no free objects");
                    }
                    Ok(())
                })?
            };
            let empty = unsafe {
                walk.list(&lists.empty, |s| {
                    check(s)?;
                    if !s.freelist().is_null() {
                        return Walk::fail(s, "span on empty list has free objects");
                    }
                    Ok(())
                })?
            };
            walk.report.nonempty_spans += nonempty;
            walk.report.empty_spans += empty;
        }

        for s in all_spans {
            let listed = walk.seen.contains(&s);
            // Safety: quiescent heap; nobody is relinking spans.
            let owner = unsafe { s.owner() };
            match s.state() {
                SpanState::InUse if owner == SpanOwner::Cache => {
                    if !s.in_cache() || listed {
                        Walk::fail(s, "cached span is also listed or not flagged")?;
                    }
                    walk.report.cached_spans += 1;
                }
                SpanState::InUse => {
                    if !listed {
                        walk.report.detached_spans += 1;
                    }
                }
                SpanState::Stack => {
                    if listed {
                        Walk::fail(s, "stack span is on a list")?;
                    }
                    walk.report.stack_spans += 1;
                }
                SpanState::Free => {
                    if !listed {
                        Walk::fail(s, "free span is on no free list")?;
                    }
                }
                SpanState::Dead => {
                    if listed {
                        Walk::fail(s, "dead span is on a list")?;
                    }
                }
            }
        }

        if walk.report.cached_spans != self.cached_spans() {
            return Err(AuditError { base: 0, problem: "cached span count disagrees with caches" });
        }
        Ok(walk.report)
    }
}
