const KILOBYTE: f64 = 1024.0;
const MEGABYTE: f64 = KILOBYTE * KILOBYTE;
const GIGABYTE: f64 = KILOBYTE * MEGABYTE;

pub fn pretty_bytes_size(len: u64) -> String {
    let float_len = len as f64;
    let (unit, value) = if float_len > GIGABYTE {
        ("GiB", float_len / GIGABYTE)
    } else if float_len > MEGABYTE {
        ("MiB", float_len / MEGABYTE)
    } else if float_len > KILOBYTE {
        ("KiB", float_len / KILOBYTE)
    } else {
        ("bytes", float_len)
    };
    format!("{:.2}{}", value, unit)
}

const MICROSECOND: f64 = 1_000.0;
const MILLISECOND: f64 = MICROSECOND * 1_000.0;
const SECOND: f64 = MILLISECOND * 1_000.0;

pub fn pretty_nanos_duration(nanos: u64) -> String {
    let float_nanos = nanos as f64;
    let (unit, value) = if float_nanos >= SECOND {
        ("s", float_nanos / SECOND)
    } else if float_nanos >= MILLISECOND {
        ("ms", float_nanos / MILLISECOND)
    } else if float_nanos >= MICROSECOND {
        ("us", float_nanos / MICROSECOND)
    } else {
        return format!("{}ns", nanos);
    };
    format!("{:.2}{}", value, unit)
}

/// Renders memory amounts for cluster reports.
pub trait NumFormatter {
    fn num_in_k_and_percent(&self, bytes: u64) -> String;
}

/// Formats an amount as kilobytes plus its share of the whole heap.
#[derive(Debug, Clone, Copy)]
pub struct MemNumFormatter {
    total_heap_size: u64,
}

impl MemNumFormatter {
    pub fn new(total_heap_size: u64) -> Self {
        Self { total_heap_size }
    }
}

impl NumFormatter for MemNumFormatter {
    fn num_in_k_and_percent(&self, bytes: u64) -> String {
        let kilobytes = (bytes + 512) / 1024;
        if self.total_heap_size == 0 {
            return format!("{}K", kilobytes);
        }
        let percent = bytes as f64 * 100.0 / self.total_heap_size as f64;
        format!("{}K ({:.1}%)", kilobytes, percent)
    }
}

/// Quotes a string for single-line display, truncating it past `max_len` chars (0 = no limit).
pub fn remove_end_lines_and_add_quotes(s: &str, max_len: usize) -> String {
    let mut result = String::with_capacity(s.len().min(max_len.max(1)) + 2);
    result.push('"');
    let mut truncated = false;
    for (i, c) in s.chars().enumerate() {
        if max_len > 0 && i >= max_len {
            truncated = true;
            break;
        }
        match c {
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            c => result.push(c),
        }
    }
    result.push('"');
    if truncated {
        result.push_str("...");
    }
    result
}

pub fn as_comma_separated_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}
