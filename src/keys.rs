//! Ordered view over sequence or read names.
//!
//! The view materializes `(id, name, length)` triples once and then sorts,
//! filters and slices cursors over them without touching the source file.
//! Filters are explicit values combined as an AND list; `reset` returns the
//! view to insertion order.

use crate::error::{Error, Result};
use crate::store::KeyEntry;

/// Sort key for [`Keys::sort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey
{
    Id,
    Name,
    Length,
}

/// One predicate of a filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter
{
    LenGt(u64),
    LenGe(u64),
    LenEq(u64),
    LenLe(u64),
    LenLt(u64),
    PrefixEq(String),
}

impl Filter
{
    fn matches(&self, entry: &KeyEntry) -> bool
    {
        match self
        {
            Filter::LenGt(n) => entry.len > *n,
            Filter::LenGe(n) => entry.len >= *n,
            Filter::LenEq(n) => entry.len == *n,
            Filter::LenLe(n) => entry.len <= *n,
            Filter::LenLt(n) => entry.len < *n,
            Filter::PrefixEq(prefix) => entry.name.starts_with(prefix.as_str()),
        }
    }
}

/// Lazy ordered collection of names.
///
/// `sort` and `filter` reorder or narrow the current cursor and can be
/// chained; iteration, indexing and slicing observe the cursor.
#[derive(Debug, Clone)]
pub struct Keys
{
    entries: Vec<KeyEntry>,
    /// Indices into `entries` in cursor order.
    view: Vec<usize>,
    /// Names sorted once for O(log N) containment checks.
    sorted_names: Vec<String>,
}

impl Keys
{
    pub fn new(entries: Vec<KeyEntry>) -> Self
    {
        let mut sorted_names: Vec<String> =
            entries.iter().map(|e| e.name.clone()).collect();
        sorted_names.sort_unstable();
        let view = (0..entries.len()).collect();
        Self { entries, view, sorted_names }
    }

    /// Number of names in the current cursor.
    pub fn len(&self) -> usize
    {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.view.is_empty()
    }

    /// Name at `index`; negative indices count from the end.
    pub fn get(&self, index: i64) -> Result<&str>
    {
        let n = self.view.len() as i64;
        let actual = if index < 0 { n + index } else { index };
        if actual < 0 || actual >= n
        {
            return Err(Error::IndexOutOfRange(format!(
                "key index {} outside collection of {}",
                index, n
            )));
        }
        Ok(&self.entries[self.view[actual as usize]].name)
    }

    /// Names of the half-open range `[start, end)`; negative bounds count
    /// from the end, and the range is clipped like a Python slice.
    pub fn slice(&self, start: i64, end: i64) -> Vec<String>
    {
        let n = self.view.len() as i64;
        let clamp = |i: i64| -> usize {
            let i = if i < 0 { n + i } else { i };
            i.clamp(0, n) as usize
        };
        let (s, e) = (clamp(start), clamp(end));
        if s >= e
        {
            return Vec::new();
        }
        self.view[s..e].iter().map(|&i| self.entries[i].name.clone()).collect()
    }

    /// Containment in O(log N), independent of sort and filter state.
    pub fn contains(&self, name: &str) -> bool
    {
        self.sorted_names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    /// Names in cursor order.
    pub fn iter(&self) -> impl Iterator<Item = &str>
    {
        self.view.iter().map(|&i| self.entries[i].name.as_str())
    }

    /// Reorder the cursor. Sorting applies to the current (possibly
    /// filtered) cursor and is stable.
    pub fn sort(&mut self, by: SortKey, reverse: bool) -> &mut Self
    {
        match by
        {
            SortKey::Id => self.view.sort_by_key(|&i| self.entries[i].id),
            SortKey::Name =>
            {
                let entries = &self.entries;
                self.view.sort_by(|&a, &b| entries[a].name.cmp(&entries[b].name));
            }
            SortKey::Length => self.view.sort_by_key(|&i| self.entries[i].len),
        }
        if reverse
        {
            self.view.reverse();
        }
        self
    }

    /// Narrow the cursor to entries matching every filter in the chain.
    pub fn filter(&mut self, filters: &[Filter]) -> &mut Self
    {
        self.view.retain(|&i| filters.iter().all(|f| f.matches(&self.entries[i])));
        self
    }

    /// Return the cursor to insertion order with no filters.
    pub fn reset(&mut self) -> &mut Self
    {
        self.view = (0..self.entries.len()).collect();
        self
    }
}

impl<'a> IntoIterator for &'a Keys
{
    type Item = &'a str;
    type IntoIter = Box<dyn Iterator<Item = &'a str> + 'a>;

    fn into_iter(self) -> Self::IntoIter
    {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn keys() -> Keys
    {
        Keys::new(vec![
            KeyEntry { id: 1, name: "JZ822577".into(), len: 500 },
            KeyEntry { id: 2, name: "JZ822578".into(), len: 700 },
            KeyEntry { id: 3, name: "AB123456".into(), len: 200 },
            KeyEntry { id: 4, name: "JZ822600".into(), len: 700 },
        ])
    }

    #[test]
    fn indexing_with_negatives()
    {
        let k = keys();
        assert_eq!(k.len(), 4);
        assert_eq!(k.get(0).unwrap(), "JZ822577");
        assert_eq!(k.get(-1).unwrap(), "JZ822600");
        assert_eq!(k.get(-4).unwrap(), "JZ822577");
        assert!(k.get(4).is_err());
        assert!(k.get(-5).is_err());
    }

    #[test]
    fn slicing_like_python()
    {
        let k = keys();
        assert_eq!(k.slice(1, 3), vec!["JZ822578", "AB123456"]);
        assert_eq!(k.slice(-2, 10), vec!["AB123456", "JZ822600"]);
        assert!(k.slice(3, 1).is_empty());
    }

    #[test]
    fn containment_is_order_independent()
    {
        let mut k = keys();
        k.sort(SortKey::Length, true);
        assert!(k.contains("AB123456"));
        assert!(!k.contains("ZZ999999"));
    }

    #[test]
    fn sorting()
    {
        let mut k = keys();
        k.sort(SortKey::Name, false);
        assert_eq!(k.get(0).unwrap(), "AB123456");

        k.reset().sort(SortKey::Length, false);
        assert_eq!(k.get(0).unwrap(), "AB123456");
        assert_eq!(k.get(-1).unwrap(), "JZ822600"); // stable: id 2 before id 4

        k.reset().sort(SortKey::Id, true);
        assert_eq!(k.get(0).unwrap(), "JZ822600");
    }

    #[test]
    fn filter_chains_are_conjunctive()
    {
        let mut k = keys();
        k.filter(&[Filter::PrefixEq("JZ8225".into()), Filter::LenGe(600)]);
        let names: Vec<&str> = k.iter().collect();
        assert_eq!(names, vec!["JZ822578"]);

        k.reset().filter(&[Filter::LenGt(600)]);
        assert_eq!(k.len(), 2);

        k.reset().filter(&[Filter::LenEq(700)]).sort(SortKey::Name, true);
        let names: Vec<&str> = k.iter().collect();
        assert_eq!(names, vec!["JZ822600", "JZ822578"]);

        k.reset();
        assert_eq!(k.len(), 4);
    }

    #[test]
    fn filtered_cursor_can_be_sliced()
    {
        let mut k = keys();
        k.filter(&[Filter::LenGe(500)]).sort(SortKey::Length, false);
        assert_eq!(k.slice(0, 2), vec!["JZ822577", "JZ822578"]);
    }
}
