//! Location and backtrace of contained panics
//!
//! A process-wide panic hook records where each panic happened into a
//! thread-local slot. `catch_unwind` runs on the panicking thread, so the
//! worker reads the slot right after catching the unwind. The previously
//! installed hook still runs.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Where a panic was raised
#[derive(Debug)]
pub(crate) struct PanicSite {
    /// `file:line:column`
    pub(crate) location: String,
    /// Captured according to `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE`
    pub(crate) backtrace: Backtrace,
}

/// Install the recording hook once per process
pub(crate) fn install_recorder() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|location| location.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            let site = PanicSite {
                location,
                backtrace: Backtrace::capture(),
            };
            LAST_PANIC.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(site);
                }
            });
            previous(info);
        }));
    });
}

/// Take the site of the most recent panic on this thread
pub(crate) fn take_last() -> Option<PanicSite> {
    LAST_PANIC.with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
}
