//! Output from payload scripts.
//!
//! `print` and `debug` calls inside payload code land here and are forwarded to
//! the `log` crate under the `principia::script` target, so they show up next
//! to host logs in the terminal or the browser console. A runaway animation
//! loop printing every frame is capped per frame.

use std::cell::Cell;

/// Messages allowed per frame before further output is dropped.
pub const MAX_LOGS_PER_FRAME: u32 = 100;

const TARGET: &str = "principia::script";

// Scripts run on the thread that owns the stage, so the budget is per thread.
thread_local! {
    static LOG_COUNT: Cell<u32> = const { Cell::new(0) };
    static WARNED_LIMIT: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLogLevel {
    Print,
    Debug,
}

/// Reset the per-frame counter. The frame driver calls this before each tick.
pub fn reset_frame_log_count() {
    LOG_COUNT.with(|count| count.set(0));
    WARNED_LIMIT.with(|warned| warned.set(false));
}

fn can_log() -> bool {
    let count = LOG_COUNT.with(|count| {
        let current = count.get();
        count.set(current.saturating_add(1));
        current
    });
    if count < MAX_LOGS_PER_FRAME {
        return true;
    }
    if !WARNED_LIMIT.with(|warned| warned.replace(true)) {
        log::warn!(
            target: TARGET,
            "script output limit reached ({} messages/frame), dropping the rest",
            MAX_LOGS_PER_FRAME
        );
    }
    false
}

/// Forward one script message, respecting the per-frame cap.
pub fn script_log(level: ScriptLogLevel, message: &str) {
    if !can_log() {
        return;
    }
    match level {
        ScriptLogLevel::Print => log::info!(target: TARGET, "{}", message),
        ScriptLogLevel::Debug => log::debug!(target: TARGET, "{}", message),
    }
}

/// Render a script value as text without panicking on any type.
pub fn stringify_dynamic(value: &rhai::Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }

    if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
        return format!("[{}]", parts.join(", "));
    }

    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let parts: Vec<String> = map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
            .collect();
        return format!("{{{}}}", parts.join(", "));
    }

    if let Ok(i) = value.as_int() {
        return i.to_string();
    }
    if let Ok(f) = value.as_float() {
        return format!("{}", f);
    }
    if let Ok(b) = value.as_bool() {
        return b.to_string();
    }
    if value.is_unit() {
        return "()".to_string();
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from("hello")), "hello");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(42_i64)), "42");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(0.5_f32)), "0.5");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(true)), "true");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::UNIT), "()");
    }

    #[test]
    fn test_stringify_array() {
        let arr: rhai::Array = vec![rhai::Dynamic::from("theta"), rhai::Dynamic::from(2_i64)];
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(arr)), "[theta, 2]");
    }

    #[test]
    fn test_frame_log_limit() {
        reset_frame_log_count();
        for _ in 0..MAX_LOGS_PER_FRAME {
            assert!(can_log());
        }
        assert!(!can_log());
        reset_frame_log_count();
        assert!(can_log());
    }
}
