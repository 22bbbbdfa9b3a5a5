//! Helpers shared by the failure boundaries of the render thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Extract the message of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic message".to_string()
    }
}

/// Run `f`, turning a panic into an error so it cannot unwind past a render tick.
pub fn catch_panic<T>(what: &str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "{} panicked: {}",
            what,
            panic_message(&*payload)
        )),
    }
}

/// Run `f` for its side effects. A panic is logged and swallowed.
pub fn log_panic(what: &str, f: impl FnOnce()) {
    let result = catch_panic(what, || {
        f();
        Ok(())
    });
    if let Err(error) = result {
        log::error!("{:#}", error);
    }
}
