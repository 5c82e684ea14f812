//! A single lazily rendered page.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::debug;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::slot";

pub(crate) const METRIC_RENDER_CACHE_HIT: &str = "recipes_render_cache_hit_total";
pub(crate) const METRIC_RENDER_CACHE_MISS: &str = "recipes_render_cache_miss_total";
pub(crate) const METRIC_RENDER_FAILURE: &str = "recipes_render_failure_total";
pub(crate) const METRIC_RENDER_MS: &str = "recipes_render_ms";

/// The page a slot renders, used to label logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Home,
    Create,
    Recipe,
    Edit,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Home => "home",
            PageKind::Create => "create",
            PageKind::Recipe => "recipe",
            PageKind::Edit => "edit",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds one rendered page, or nothing when the page must be rendered again.
///
/// Hits only take the shared lock. A miss takes the exclusive lock, checks
/// again, and renders while holding it, so concurrent misses collapse into a
/// single render. A failed render leaves the slot empty and the next caller
/// renders again.
#[derive(Default)]
pub struct PageSlot {
    page: RwLock<Option<Arc<str>>>,
}

impl PageSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached page, rendering it with `render` on a miss.
    pub fn get_or_render<E, F>(&self, kind: PageKind, render: F) -> Result<Arc<str>, E>
    where
        F: FnOnce(&mut String) -> Result<(), E>,
    {
        if let Some(page) = rw_read(&self.page, SOURCE, "get_or_render.read").as_ref() {
            counter!(METRIC_RENDER_CACHE_HIT, "page" => kind.as_str()).increment(1);
            return Ok(Arc::clone(page));
        }

        let mut slot = rw_write(&self.page, SOURCE, "get_or_render.write");
        if let Some(page) = slot.as_ref() {
            // Filled by the caller that held the lock before us.
            counter!(METRIC_RENDER_CACHE_HIT, "page" => kind.as_str()).increment(1);
            return Ok(Arc::clone(page));
        }

        counter!(METRIC_RENDER_CACHE_MISS, "page" => kind.as_str()).increment(1);
        let started_at = Instant::now();
        let mut out = String::new();
        if let Err(err) = render(&mut out) {
            counter!(METRIC_RENDER_FAILURE, "page" => kind.as_str()).increment(1);
            return Err(err);
        }
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS, "page" => kind.as_str()).record(elapsed_ms);
        debug!(page = %kind, elapsed_ms, bytes = out.len(), "page rendered");

        let page: Arc<str> = Arc::from(out);
        *slot = Some(Arc::clone(&page));
        Ok(page)
    }

    /// Drop the cached page. Waits for an in-flight render of this slot to finish.
    pub fn invalidate(&self) {
        *rw_write(&self.page, SOURCE, "invalidate") = None;
    }

    pub fn is_rendered(&self) -> bool {
        rw_read(&self.page, SOURCE, "is_rendered").is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn renders_once_then_serves_cached_page() {
        let slot = PageSlot::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let page = slot
                .get_or_render(PageKind::Home, |out| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    out.push_str("<h1>home</h1>");
                    Ok::<_, String>(())
                })
                .expect("render succeeds");
            assert_eq!(&*page, "<h1>home</h1>");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.is_rendered());
    }

    #[test]
    fn concurrent_misses_render_once() {
        const CALLERS: usize = 16;
        let slot = PageSlot::new();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(CALLERS);

        let pages: Vec<Arc<str>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        slot.get_or_render(PageKind::Recipe, |out| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            out.push_str("rendered");
                            Ok::<_, String>(())
                        })
                        .expect("render succeeds")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("caller thread"))
                .collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pages.iter().all(|page| Arc::ptr_eq(page, &pages[0])));
    }

    #[test]
    fn failed_render_is_not_cached() {
        let slot = PageSlot::new();

        let err = slot
            .get_or_render(PageKind::Edit, |out| {
                out.push_str("partial");
                Err("template exploded".to_string())
            })
            .expect_err("render fails");
        assert_eq!(err, "template exploded");
        assert!(!slot.is_rendered());

        let page = slot
            .get_or_render(PageKind::Edit, |out| {
                out.push_str("complete");
                Ok::<_, String>(())
            })
            .expect("retry succeeds");
        assert_eq!(&*page, "complete");
    }

    #[test]
    fn callers_waiting_on_a_failed_render_retry() {
        const CALLERS: usize = 8;
        let slot = PageSlot::new();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(CALLERS);

        let results: Vec<Result<Arc<str>, String>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        slot.get_or_render(PageKind::Home, |out| {
                            let call = calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            if call == 0 {
                                return Err("first render fails".to_string());
                            }
                            out.push_str("second render");
                            Ok(())
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("caller thread"))
                .collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(results.iter().filter(|result| result.is_err()).count(), 1);
        for page in results.iter().filter_map(|result| result.as_ref().ok()) {
            assert_eq!(&**page, "second render");
        }
    }

    #[test]
    fn invalidate_forces_rerender_and_is_idempotent() {
        let slot = PageSlot::new();
        let calls = AtomicUsize::new(0);
        let render = |out: &mut String| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            out.push_str(&format!("v{call}"));
            Ok::<_, String>(())
        };

        slot.invalidate();
        slot.invalidate();
        assert!(!slot.is_rendered());

        assert_eq!(&*slot.get_or_render(PageKind::Home, render).unwrap(), "v0");
        slot.invalidate();
        slot.invalidate();
        assert_eq!(&*slot.get_or_render(PageKind::Home, render).unwrap(), "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn slot_recovers_from_panicking_render() {
        let slot = PageSlot::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _ = slot.get_or_render(PageKind::Create, |_out| -> Result<(), String> {
                panic!("renderer panicked");
            });
        }));

        assert!(!slot.is_rendered());
        let page = slot
            .get_or_render(PageKind::Create, |out| {
                out.push_str("form");
                Ok::<_, String>(())
            })
            .expect("render after poison succeeds");
        assert_eq!(&*page, "form");
    }
}
