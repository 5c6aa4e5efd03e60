use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

/// Installs the logger from `RUST_LOG`. Without it logging stays off.
pub fn init() {
    match std::env::var("RUST_LOG") {
        Ok(directives) => {
            init_with_directives(&directives);
        }
        Err(_) => println!("Logging disabled"),
    }
}

/// Returns false if a logger was already installed, as happens when several tests or
/// embedding applications initialize logging.
pub fn init_with_directives(directives: &str) -> bool {
    let installed = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init()
        .is_ok();
    if installed {
        println!("Logging enabled with directives: {directives}",);
    }
    installed
}

/// Renders protocol values for log lines, as JSON when `RUST_LOG_JSON` is set.
pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if *RUST_LOG_JSON {
        let json = serde_json::json!(&value);
        match serde_json::to_string_pretty(&json) {
            Ok(s) => s,
            _ => json.to_string(),
        }
    } else {
        format!("{value:?}",)
    }
}
