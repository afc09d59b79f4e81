//! Leveled logging macros.
//!
//! With the `esp32-log` feature every macro prints through `esp-println`.
//! Without it the arguments are still type-checked, then dropped.

#[cfg(feature = "esp32-log")]
macro_rules! log_at {
    ($level:literal, $($arg:tt)*) => {
        esp_println::println!("[{}] {}", $level, format_args!($($arg)*))
    };
}

#[cfg(not(feature = "esp32-log"))]
macro_rules! log_at {
    ($level:literal, $($arg:tt)*) => {{
        let _ = $level;
        let _ = format_args!($($arg)*);
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => { log_at!("DEBUG", $($arg)*) };
}

macro_rules! log_info {
    ($($arg:tt)*) => { log_at!("INFO", $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { log_at!("WARN", $($arg)*) };
}

macro_rules! log_error {
    ($($arg:tt)*) => { log_at!("ERROR", $($arg)*) };
}
