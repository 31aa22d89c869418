// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Panic containment for caller-supplied actions.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Run `f`, reporting a panic through `tracing` instead of unwinding into
/// the caller. Returns `false` if `f` panicked.
pub(crate) fn run_contained(context: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                context,
                panic = panic_message(payload.as_ref()),
                "action panicked; continuing"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_str_and_string_panics() {
        assert!(run_contained("ok", || {}));
        assert!(!run_contained("str", || panic!("boom")));
        assert!(!run_contained("string", || panic!("{}", String::from("formatted"))));
    }

    #[test]
    fn message_from_payload() {
        let payload = panic::catch_unwind(|| panic!("disk full")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "disk full");

        let payload = panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
