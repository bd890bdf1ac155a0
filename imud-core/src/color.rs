//! Pinkfish color markup (`%^RED%^text%^RESET%^`) to ANSI escapes.

const DELIMITER: &str = "%^";

fn ansi(code: &str) -> Option<&'static str> {
    let esc = match code {
        "RED" => "\x1b[31m",
        "GREEN" => "\x1b[32m",
        "ORANGE" | "YELLOW" => "\x1b[33m",
        "BLUE" => "\x1b[34m",
        "MAGENTA" => "\x1b[35m",
        "CYAN" => "\x1b[36m",
        "WHITE" => "\x1b[37m",
        "B_RED" => "\x1b[91m",
        "B_GREEN" => "\x1b[92m",
        "B_ORANGE" | "B_YELLOW" => "\x1b[93m",
        "B_BLUE" => "\x1b[94m",
        "B_MAGENTA" => "\x1b[95m",
        "B_CYAN" => "\x1b[96m",
        "B_WHITE" => "\x1b[97m",
        "RESET" => "\x1b[0m",
        "BOLD" => "\x1b[1m",
        "UNDERLINE" => "\x1b[4m",
        "FLASH" => "\x1b[5m",
        "REVERSE" => "\x1b[7m",
        _ => return None,
    };
    Some(esc)
}

/// Translate Pinkfish markup. Unknown codes are dropped, delimiters never leak.
pub fn pinkfish_to_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, segment) in text.split(DELIMITER).enumerate() {
        // Segments between delimiters may be codes; the leading one is always text.
        match (i > 0).then(|| ansi(segment)).flatten() {
            Some(esc) => out.push_str(esc),
            None => out.push_str(segment),
        }
    }
    out
}

/// Remove all markup, keeping only the text.
pub fn strip(text: &str) -> String {
    text.split(DELIMITER)
        .enumerate()
        .filter(|(i, s)| *i == 0 || ansi(s).is_none())
        .map(|(_, s)| s)
        .collect()
}
