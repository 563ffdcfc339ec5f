use statrs::statistics::Statistics;

/// Logs at info level, stripping ANSI colours when `$colorful` is false
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)*) => {
        log::info!("{}", $crate::utils::strip_ansi_if_needed(&format!($($arg)*), $colorful))
    };
}

/// a macro to declare simple Vec<String>
#[macro_export]
macro_rules! string_vec {
    ($($x:expr),*) => {
        vec![$($x.into()),*]
    };
}

/// Shortest decimal form that parses back to the same f64 (`1.0`, `0.01`, `1e-7`)
pub fn fmt_float(value: f64) -> String {
    format!("{:?}", value)
}

/// Removes `ESC[...m` sequences unless colours are wanted
pub fn strip_ansi_if_needed(text: &str, colorful: bool) -> String {
    if colorful {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `<crate version>#<short git hash>` when the build knew the hash
pub fn version() -> String {
    match option_env!("GSVM_GIT_SHA") {
        Some(sha) => format!("{}#{}", env!("CARGO_PKG_VERSION"), sha),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Mean and standard deviation of a fitness sample, (0,0) when empty
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().mean();
    let std = if values.len() > 1 { values.iter().std_dev() } else { 0.0 };
    (mean, std)
}

/// Percentage of selected features, as written in reports
pub fn selected_pct(selected: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (selected as f64 * 100.0) / total as f64
    }
}
