//! Class ordering for fee summaries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassOrdering {
    /// Highest outstanding amount first, ties in natural order.
    #[default]
    Outstanding,
    /// Pre-primary names, then numbered classes, then the rest by name.
    Natural,
}

impl ClassOrdering {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outstanding" => Some(ClassOrdering::Outstanding),
            "natural" => Some(ClassOrdering::Natural),
            _ => None,
        }
    }
}

const PRE_PRIMARY: [&str; 4] = ["nursery", "lkg", "ukg", "kg"];
const PREFIXES: [&str; 4] = ["class", "grade", "std", "standard"];

/// Sort key: (bucket, number, lowercase name).
pub fn class_rank(name: &str) -> (u8, u64, String) {
    let lower = name.trim().to_ascii_lowercase();
    let head = lower
        .split(|c: char| c.is_whitespace() || c == '-')
        .next()
        .unwrap_or("");
    if let Some(pos) = PRE_PRIMARY.iter().position(|p| *p == head) {
        return (0, pos as u64, lower);
    }

    let mut rest = lower.as_str();
    for p in PREFIXES {
        if let Some(stripped) = rest.strip_prefix(p) {
            rest = stripped.trim_start();
            break;
        }
    }
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    match digits.parse::<u64>() {
        Ok(n) => (1, n, lower),
        Err(_) => (2, 0, lower),
    }
}

pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    class_rank(a).cmp(&class_rank(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_primary_then_numeric_then_alphabetic() {
        let mut names = vec![
            "10", "Class 2", "UKG", "Arts", "1", "Nursery", "LKG", "Grade 9", "3-A", "Commerce",
        ];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            vec!["Nursery", "LKG", "UKG", "1", "Class 2", "3-A", "Grade 9", "10", "Arts", "Commerce"]
        );
    }

    #[test]
    fn numeric_classes_do_not_sort_lexically() {
        assert_eq!(natural_cmp("2", "10"), Ordering::Less);
        assert_eq!(natural_cmp("Class 12", "Class 9"), Ordering::Greater);
    }

    #[test]
    fn ordering_names_parse() {
        assert_eq!(ClassOrdering::parse("Natural"), Some(ClassOrdering::Natural));
        assert_eq!(ClassOrdering::parse("bogus"), None);
        assert_eq!(ClassOrdering::default(), ClassOrdering::Outstanding);
    }
}
