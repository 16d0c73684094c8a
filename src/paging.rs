//! Paged results.
//!
//! A [`PagedResult`] carries one page of items plus the metadata callers need to render a
//! pager. Pages are numbered from `index_from` (0 or 1 in practice).

use crate::error::UowError;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Which page to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub size: usize,
    pub index_from: usize,
}

impl Page {
    /// Page `index` of `size` items, numbered from 0
    pub fn new(index: usize, size: usize) -> Self {
        Self {
            index,
            size,
            index_from: 0,
        }
    }

    pub fn index_from(mut self, index_from: usize) -> Self {
        self.index_from = index_from;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), UowError> {
        validate(self.index, self.size, self.index_from)
    }

    /// Rows to skip before this page
    pub(crate) fn offset(&self) -> usize {
        (self.index - self.index_from).saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

fn validate(page_index: usize, page_size: usize, index_from: usize) -> Result<(), UowError> {
    if index_from > page_index {
        return Err(UowError::InvalidArgument(format!(
            "indexFrom: {index_from} > pageIndex: {page_index}, must indexFrom <= pageIndex"
        )));
    }
    if page_size == 0 {
        return Err(UowError::InvalidArgument(
            "pageSize must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// One page of results.
///
/// # Examples
///
/// ```
/// use uow::PagedResult;
///
/// let page = PagedResult::from_items(1..=25, 2, 10, 0).unwrap();
/// assert_eq!(page.items(), &[21, 22, 23, 24, 25]);
/// assert_eq!(page.total_pages(), 3);
/// assert!(page.has_previous_page());
/// assert!(!page.has_next_page());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    page_index: usize,
    page_size: usize,
    index_from: usize,
    total_count: usize,
    total_pages: usize,
    items: Vec<T>,
}

impl<T> PagedResult<T> {
    /// Wrap an already sliced page.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `index_from > page_index` or `page_size == 0`.
    pub fn new(
        items: Vec<T>,
        page_index: usize,
        page_size: usize,
        index_from: usize,
        total_count: usize,
    ) -> Result<Self, UowError> {
        validate(page_index, page_size, index_from)?;
        Ok(Self {
            page_index,
            page_size,
            index_from,
            total_count,
            total_pages: total_count.div_ceil(page_size),
            items,
        })
    }

    /// Count an in-memory sequence and slice the requested page out of it
    pub fn from_items<I>(
        source: I,
        page_index: usize,
        page_size: usize,
        index_from: usize,
    ) -> Result<Self, UowError>
    where
        I: IntoIterator<Item = T>,
    {
        validate(page_index, page_size, index_from)?;
        let all: Vec<T> = source.into_iter().collect();
        let total_count = all.len();
        let offset = (page_index - index_from).saturating_mul(page_size);
        let items = all.into_iter().skip(offset).take(page_size).collect();
        Self::new(items, page_index, page_size, index_from, total_count)
    }

    /// No items, page 0 of size 0
    pub fn empty() -> Self {
        Self {
            page_index: 0,
            page_size: 0,
            index_from: 0,
            total_count: 0,
            total_pages: 0,
            items: Vec::new(),
        }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn index_from(&self) -> usize {
        self.index_from
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn has_previous_page(&self) -> bool {
        self.page_index - self.index_from > 0
    }

    pub fn has_next_page(&self) -> bool {
        self.page_index - self.index_from + 1 < self.total_pages
    }

    /// Convert the items, keeping the paging metadata
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PagedResult<U> {
        PagedResult {
            page_index: self.page_index,
            page_size: self.page_size,
            index_from: self.index_from,
            total_count: self.total_count,
            total_pages: self.total_pages,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

impl<T> Default for PagedResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Serialize> Serialize for PagedResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PagedResult", 8)?;
        state.serialize_field("pageIndex", &self.page_index)?;
        state.serialize_field("pageSize", &self.page_size)?;
        state.serialize_field("indexFrom", &self.index_from)?;
        state.serialize_field("totalCount", &self.total_count)?;
        state.serialize_field("totalPages", &self.total_pages)?;
        state.serialize_field("items", &self.items)?;
        state.serialize_field("hasPreviousPage", &self.has_previous_page())?;
        state.serialize_field("hasNextPage", &self.has_next_page())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_from_greater_than_page_index_is_rejected() {
        let err = PagedResult::<i32>::new(Vec::new(), 0, 10, 1, 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: indexFrom: 1 > pageIndex: 0, must indexFrom <= pageIndex"
        );
        assert!(PagedResult::<i32>::new(Vec::new(), 1, 10, 1, 0).is_ok());
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let err = PagedResult::from_items(vec![1, 2], 0, 0, 0).unwrap_err();
        assert!(matches!(err, UowError::InvalidArgument(_)));
    }

    #[test]
    fn test_total_pages_rounds_up() {
        for (count, size, pages) in [(0, 10, 0), (1, 10, 1), (10, 10, 1), (11, 10, 2), (25, 10, 3)] {
            let page = PagedResult::<u8>::new(Vec::new(), 0, size, 0, count).unwrap();
            assert_eq!(page.total_pages(), pages, "{count} items / {size}");
        }
    }

    #[test]
    fn test_twenty_five_items_in_pages_of_ten() {
        let first = PagedResult::from_items(0..25, 0, 10, 0).unwrap();
        assert_eq!(first.items().len(), 10);
        assert!(first.has_next_page());
        assert!(!first.has_previous_page());

        let last = PagedResult::from_items(0..25, 2, 10, 0).unwrap();
        assert_eq!(last.items().len(), 5);
        assert!(!last.has_next_page());
        assert!(last.has_previous_page());

        let beyond = PagedResult::from_items(0..25, 7, 10, 0).unwrap();
        assert!(beyond.items().is_empty());
        assert_eq!(beyond.total_count(), 25);
    }

    #[test]
    fn test_one_based_numbering() {
        let page = PagedResult::from_items(0..25, 1, 10, 1).unwrap();
        assert_eq!(page.items()[0], 0);
        assert!(!page.has_previous_page());
        assert!(page.has_next_page());
    }

    #[test]
    fn test_map_keeps_metadata() {
        let page = PagedResult::from_items(1..=3, 0, 2, 0).unwrap().map(|n| n * 10);
        assert_eq!(page.items(), &[10, 20]);
        assert_eq!(page.total_count(), 3);
    }

    #[test]
    fn test_serializes_camel_case_with_flags() {
        let page = PagedResult::from_items(vec!["a", "b", "c"], 1, 2, 0).unwrap();
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({
                "pageIndex": 1,
                "pageSize": 2,
                "indexFrom": 0,
                "totalCount": 3,
                "totalPages": 2,
                "items": ["c"],
                "hasPreviousPage": true,
                "hasNextPage": false,
            })
        );
    }

    #[test]
    fn test_empty() {
        let page = PagedResult::<String>::empty();
        assert_eq!(page.total_pages(), 0);
        assert!(!page.has_next_page());
        assert!(!page.has_previous_page());
    }
}
