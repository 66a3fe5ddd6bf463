pub mod build;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_FLAVOR_ERROR: u8 = 2;
pub const EXIT_TOOL_ERROR: u8 = 3;

/// Exit code for an error message produced by a command.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("flavor error:") || msg.starts_with("template error:") {
        EXIT_FLAVOR_ERROR
    } else if msg.starts_with("runtime error:") || msg.starts_with("missing prerequisites") {
        EXIT_TOOL_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn highlight(text: &str) -> String {
    console::Style::new().green().bold().apply_to(text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"volume_id": "Live"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"volume_id\""));
        assert!(result.contains("\"Live\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_FLAVOR_ERROR);
        assert_ne!(EXIT_FLAVOR_ERROR, EXIT_TOOL_ERROR);
    }

    #[test]
    fn exit_code_classification() {
        assert_eq!(
            exit_code_for("flavor error: invalid field 'volume_id': missing required field"),
            EXIT_FLAVOR_ERROR
        );
        assert_eq!(
            exit_code_for("template error: unknown field 'x' in template"),
            EXIT_FLAVOR_ERROR
        );
        assert_eq!(
            exit_code_for("runtime error: xorrisofs failed: exit status 1"),
            EXIT_TOOL_ERROR
        );
        assert_eq!(
            exit_code_for("missing prerequisites:\n  - xorrisofs"),
            EXIT_TOOL_ERROR
        );
        assert_eq!(
            exit_code_for("source directory not found: /nope"),
            EXIT_FAILURE
        );
    }

    #[test]
    fn highlight_keeps_text() {
        assert!(highlight("out.iso").contains("out.iso"));
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
    }

    #[test]
    fn spinner_fail_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
