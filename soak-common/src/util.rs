//! Small helpers shared across the harness.

use std::time::Duration;

/// Format a duration as `N Day(s) HH:MM:SS`.
pub fn format_ddhhmmss(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let unit = if days == 1 { "Day" } else { "Days" };
    format!("{days} {unit} {hours:02}:{minutes:02}:{seconds:02}")
}

/// Random alphanumeric payload of `len` bytes.
pub fn random_payload(len: usize) -> Vec<u8> {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(len)
        .map(|c| c as u8)
        .collect()
}

/// Substitute `{key}` placeholders in a command template.
///
/// Unknown placeholders are left untouched.
pub fn render_command(template: &str, values: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in values {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

/// Make a string safe to use as a file-name component.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
