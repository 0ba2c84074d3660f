//! Query / Search Layer
//!
//! Substring search over bucket names, keys and values. Every search is a
//! full ordered scan of the relevant index filtered in memory; there is no
//! text index.

use crate::error::Result;

/// Which half of an entry a filter tests or emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Key,
    Value,
}

/// Case-sensitive, unanchored substring test. An empty needle matches.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Names containing `needle`, order preserved
pub fn filter_names(names: Vec<Vec<u8>>, needle: &[u8]) -> Vec<Vec<u8>> {
    names
        .into_iter()
        .filter(|name| contains(name, needle))
        .collect()
}

/// Emit `field` of every entry
pub fn project<I>(entries: I, field: Field) -> Result<Vec<Vec<u8>>>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
{
    select(entries, field, &[], field)
}

/// Emit the `emit` half of every entry whose `test` half contains `needle`
pub fn select<I>(entries: I, test: Field, needle: &[u8], emit: Field) -> Result<Vec<Vec<u8>>>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
{
    let mut out = Vec::new();
    for entry in entries {
        let (key, value) = entry?;
        let tested = match test {
            Field::Key => &key,
            Field::Value => &value,
        };
        if !contains(tested, needle) {
            continue;
        }
        out.push(match emit {
            Field::Key => key,
            Field::Value => value,
        });
    }
    Ok(out)
}
