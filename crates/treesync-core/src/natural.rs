#![forbid(unsafe_code)]

//! Natural ("human") ordering of node names.
//!
//! Names are compared run by run: maximal runs of ASCII digits compare by
//! numeric value, everything else compares case-insensitively. This keeps
//! `item2` ahead of `item10`, which a plain byte comparison would not.
//!
//! ```
//! use std::cmp::Ordering;
//! use treesync_core::natural::compare_natural;
//!
//! assert_eq!(compare_natural("item2", "item10"), Ordering::Less);
//! assert_eq!(compare_natural("Pump", "pump 1"), Ordering::Less);
//! ```

use std::cmp::Ordering;

/// One run of a name: either digits or non-digit text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run<'a> {
    Digits(&'a str),
    Text(&'a str),
}

/// Iterator over the digit / text runs of a string.
struct Runs<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Runs<'a> {
    type Item = Run<'a>;

    fn next(&mut self) -> Option<Run<'a>> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map_or(self.rest.len(), |(i, _)| i);
        let (run, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if digits {
            Run::Digits(run)
        } else {
            Run::Text(run)
        })
    }
}

fn runs(s: &str) -> Runs<'_> {
    Runs { rest: s }
}

/// Compare two digit runs by value without parsing (no overflow).
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
}

fn compare_text(a: &str, b: &str) -> Ordering {
    let a_lower = a.chars().flat_map(char::to_lowercase);
    let b_lower = b.chars().flat_map(char::to_lowercase);
    a_lower.cmp(b_lower)
}

/// Natural comparison of two names.
///
/// Digit runs sort before text runs at the same position. When two names
/// are equal under the natural rules (`a01` vs `a1`, `Pump` vs `pump`),
/// shorter digit runs and then plain byte order decide, so the result is a
/// total order consistent with `==`.
#[must_use]
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    let mut left = runs(a);
    let mut right = runs(b);
    let mut tiebreak = Ordering::Equal;
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Run::Digits(x)), Some(Run::Digits(y))) => {
                if tiebreak == Ordering::Equal {
                    tiebreak = x.len().cmp(&y.len());
                }
                compare_digits(x, y)
            }
            (Some(Run::Text(x)), Some(Run::Text(y))) => compare_text(x, y),
            (Some(Run::Digits(_)), Some(Run::Text(_))) => Ordering::Less,
            (Some(Run::Text(_)), Some(Run::Digits(_))) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    tiebreak.then_with(|| a.cmp(b))
}

/// Index at which `name` must be inserted into `items` to keep them in
/// natural order.
///
/// Returns the first index whose name compares `>=` to `name`. `items` must
/// already be sorted by [`compare_natural`] under `name_of`.
/// `name_of` may borrow from anything that outlives `items`, so it can look
/// names up in a side table rather than in the items themselves.
pub fn insertion_point<'a, T>(
    items: &'a [T],
    name: &str,
    mut name_of: impl FnMut(&'a T) -> &'a str,
) -> usize {
    let (mut lo, mut hi) = (0, items.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if compare_natural(name_of(&items[mid]), name) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
