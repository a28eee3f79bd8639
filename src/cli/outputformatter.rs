use serde_json::Value;

use terminal_size::{terminal_size, Height, Width};

/// Print a command result: a table for row-shaped values, pretty JSON otherwise.
/// `PULSE_OUTPUT=json` forces JSON.
pub fn print_result(val: &Value) {
    let force_json = std::env::var("PULSE_OUTPUT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    if !force_json {
        let termw = get_terminal_width();
        crate::tprintln!("[cli.outputformatter] detected terminal width={} columns", termw);
        if let Some(lines) = render_table(val, termw) {
            for l in lines { println!("{}", l); }
            return;
        }
    }
    match serde_json::to_string_pretty(val) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", val),
    }
}

/// Render rows as an ASCII table fitted to `termw`.
///
/// Accepts a bare array of objects or scalars, or a gateway page envelope
/// (`{"count", "results", ...}`). Returns `None` when there is nothing row-shaped
/// to show, including an empty result.
pub fn render_table(val: &Value, termw: usize) -> Option<Vec<String>> {
    let (arr, total) = match val {
        Value::Array(arr) => (arr, None),
        Value::Object(map) => (map.get("results")?.as_array()?, map.get("count").and_then(|c| c.as_u64())),
        _ => return None,
    };
    if arr.is_empty() { return None; }
    let (cols, rows) = tabulate(arr);

    let mut widths: Vec<usize> = cols.iter().map(|s| visible_len(s).min(termw)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = visible_len(cell);
            if w > widths[i] { widths[i] = w.min(termw); }
        }
    }

    let sep = build_separator(&widths);
    let mut out = Vec::with_capacity(rows.len() + 5);
    out.push(fit_line_to_width(&sep, termw));
    out.push(fit_line_to_width(&build_row_header_colored(&cols, &widths), termw));
    out.push(fit_line_to_width(&sep, termw));
    for r in &rows {
        out.push(fit_line_to_width(&build_row(r, &widths), termw));
    }
    out.push(fit_line_to_width(&sep, termw));

    let mut summary = format!("rows: {}, cols: {}", rows.len(), cols.len());
    if let Some(t) = total {
        summary.push_str(&format!(", total: {}", t));
        if val.get("next").map_or(false, |n| !n.is_null()) { summary.push_str(", more pages"); }
    }
    out.push(fit_line_to_width(&summary, termw));
    Some(out)
}

// Objects become one column per key (union across rows, sorted); anything else
// lands in a single "value" column.
fn tabulate(arr: &[Value]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut keys: Vec<String> = Vec::new();
    let mut all_objects = true;
    for el in arr {
        match el {
            Value::Object(map) => {
                for k in map.keys() {
                    if !keys.contains(k) { keys.push(k.clone()); }
                }
            }
            _ => all_objects = false,
        }
    }
    if all_objects && !keys.is_empty() {
        keys.sort();
        let rows = arr
            .iter()
            .map(|el| keys.iter().map(|k| to_cell_string(el.get(k).unwrap_or(&Value::Null))).collect())
            .collect();
        return (keys, rows);
    }
    (vec!["value".to_string()], arr.iter().map(|el| vec![to_cell_string(el)]).collect())
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // nested values stay compact JSON
        other => other.to_string(),
    }
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or_default();
        let text = truncate(cell, *w);
        let pad = " ".repeat(w.saturating_sub(visible_len(&text)));
        s.push(' ');
        if is_numeric_like(cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

// Header names in green, padded on visible width.
fn build_row_header_colored(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or_default();
        let text = truncate(cell, *w);
        s.push(' ');
        s.push_str(&format!("\x1b[32m{}\x1b[0m", text));
        s.push_str(&" ".repeat(w.saturating_sub(visible_len(&text))));
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    st.chars().any(|c| c.is_ascii_digit()) && st.chars().all(|c| c.is_ascii_digit() || ".-+eE,_".contains(c))
}

// --- Terminal fitting & ANSI helpers ---

fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), Height(_))) => (w as usize).saturating_sub(4).max(20),
        None => 80,
    }
}

fn fit_line_to_width(s: &str, maxw: usize) -> String {
    if visible_len(s) <= maxw { return s.to_string(); }
    elide_middle_preserving_ansi(s, maxw)
}

/// Split into escape sequences and visible chars.
fn tokens(s: &str) -> Vec<(bool, String)> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\x1b' {
            out.push((false, ch.to_string()));
            continue;
        }
        // CSI: ESC [ ... letter
        let mut seq = String::from(ch);
        if chars.peek() == Some(&'[') {
            for c in chars.by_ref() {
                seq.push(c);
                if c.is_ascii_alphabetic() { break; }
            }
        }
        out.push((true, seq));
    }
    out
}

fn visible_len(s: &str) -> usize {
    tokens(s).iter().filter(|(ansi, _)| !ansi).count()
}

fn elide_middle_preserving_ansi(s: &str, maxw: usize) -> String {
    if maxw <= 3 { return "…".repeat(maxw.min(1)); }
    let budget = maxw - 3;
    let front_keep = budget / 2;
    let back_keep = budget - front_keep;
    let toks = tokens(s);
    let total = toks.iter().filter(|(ansi, _)| !ansi).count();

    let mut out = String::new();
    let mut seen = 0usize;
    let mut elided = false;
    for (ansi, text) in &toks {
        if *ansi {
            out.push_str(text);
            continue;
        }
        if seen < front_keep || seen >= total - back_keep {
            out.push_str(text);
        } else if !elided {
            out.push_str("...");
            elided = true;
        }
        seen += 1;
    }
    // a cut escape must not bleed color into the next line
    out.push_str("\x1b[0m");
    out
}
