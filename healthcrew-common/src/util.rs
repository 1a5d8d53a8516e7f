//! Shared string helpers.

/// Credential markers whose following value is hidden in logs and reports.
const SENSITIVE_MARKERS: &[&str] = &[
    "--token=",
    "--token ",
    "--password=",
    "--password ",
    "--client-key=",
    "Authorization: Bearer ",
    "TOKEN=",
    "PASSWORD=",
    "API_KEY=",
    "SECRET=",
];

const MASK: &str = "***";

/// Byte length of the shell word at the start of `s`, honouring quotes and
/// backslash escapes.
fn word_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote: Option<char> = None;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
        } else if c == '"' || c == '\'' {
            in_quote = Some(c);
        } else if c.is_whitespace() {
            break;
        }
        end += c.len_utf8();
    }
    end
}

/// Mask credentials in a command line before it is logged or stored.
///
/// `oc login --server=https://api:6443 --token=sha256~abc` becomes
/// `oc login --server=https://api:6443 --token=***`.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let mut result = cmd.to_string();
    for marker in SENSITIVE_MARKERS {
        let mut search_start = 0;
        while let Some(found) = result[search_start..].find(marker) {
            let value_start = search_start + found + marker.len();
            let value_end = value_start + word_end(&result[value_start..]);
            if value_end > value_start {
                result.replace_range(value_start..value_end, MASK);
            }
            search_start = value_start + MASK.len().min(result.len() - value_start);
        }
    }
    result
}

/// Cap `text` at `max_bytes`, cutting on a char boundary and noting how much
/// was dropped.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [truncated {} bytes]",
        &text[..cut],
        text.len() - cut
    )
}
