//! Ordering and path helpers for computed values.

use std::cmp::Ordering;

use h5gate_store::{path, Value};

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Compare two digit strings as unbounded integers.
fn numeric_cmp(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.cmp(b))
}

/// Sort numerically when every item is a plain digit string, bytewise
/// otherwise.
pub fn natural_sort(items: &mut [String]) {
    if items.iter().all(|s| is_numeric(s)) {
        items.sort_by(|a, b| numeric_cmp(a, b));
    } else {
        items.sort();
    }
}

pub fn natural_sorted(mut items: Vec<String>) -> Vec<String> {
    natural_sort(&mut items);
    items
}

/// `value` with list elements in natural order; scalars unchanged.
pub fn sorted_value(value: &Value) -> Value {
    match value {
        Value::TextArray(items) => Value::TextArray(natural_sorted(items.clone())),
        Value::IntArray(items) => {
            let mut items = items.clone();
            items.sort_unstable();
            Value::IntArray(items)
        }
        Value::FloatArray(items) => {
            let mut items = items.clone();
            items.sort_by(f64::total_cmp);
            Value::FloatArray(items)
        }
        other => other.clone(),
    }
}

/// Drop the longest run of trailing components shared by every path. At
/// least one component of each path always survives.
pub fn trim_common_suffix(paths: &[String]) -> Vec<String> {
    if paths.len() < 2 {
        return paths.to_vec();
    }
    let split: Vec<Vec<&str>> = paths.iter().map(|p| path::components(p)).collect();
    let shortest = split.iter().map(Vec::len).min().unwrap_or(0);
    let mut shared = 0;
    while shared + 1 < shortest {
        let comp = split[0][split[0].len() - 1 - shared];
        if split
            .iter()
            .all(|parts| parts[parts.len() - 1 - shared] == comp)
        {
            shared += 1;
        } else {
            break;
        }
    }
    paths
        .iter()
        .zip(&split)
        .map(|(original, parts)| {
            let kept = parts[..parts.len() - shared].join("/");
            if path::is_absolute(original) {
                format!("/{kept}")
            } else {
                kept
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn numeric_strings_sort_as_numbers() {
        assert_eq!(natural_sorted(strings(&["10", "2", "1"])), strings(&["1", "2", "10"]));
        assert_eq!(
            natural_sorted(strings(&["007", "7", "100000000000000000000000", "3"])),
            strings(&["3", "007", "7", "100000000000000000000000"])
        );
    }

    #[test]
    fn mixed_strings_sort_bytewise() {
        assert_eq!(natural_sorted(strings(&["b", "a", "10x"])), strings(&["10x", "a", "b"]));
        assert_eq!(natural_sorted(strings(&["10", "9", "x"])), strings(&["10", "9", "x"]));
    }

    #[test]
    fn trims_shared_suffix() {
        assert_eq!(
            trim_common_suffix(&strings(&["/a/x/data", "/b/y/data"])),
            strings(&["/a/x", "/b/y"])
        );
        assert_eq!(
            trim_common_suffix(&strings(&["/a/ts", "/a/ts"])),
            strings(&["/a", "/a"])
        );
        assert_eq!(
            trim_common_suffix(&strings(&["/a/ts", "/ts"])),
            strings(&["/a/ts", "/ts"])
        );
        assert_eq!(trim_common_suffix(&strings(&["/only/one"])), strings(&["/only/one"]));
    }

    #[test]
    fn sorts_list_values() {
        assert_eq!(sorted_value(&Value::IntArray(vec![3, 1, 2])), Value::IntArray(vec![1, 2, 3]));
        assert_eq!(
            sorted_value(&Value::texts(["10", "9"])),
            Value::texts(["9", "10"])
        );
        assert_eq!(sorted_value(&Value::Int(4)), Value::Int(4));
    }
}
