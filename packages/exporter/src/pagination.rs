//! Page arithmetic shared by the exporters.

/// One bounded fetch against a remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: u64,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}

impl Page {
    /// Zero-based page `index` of size `size`: `[index*size, index*size + size - 1]`.
    pub fn nth(index: u64, size: u64) -> Self {
        let start = index * size;
        Self {
            index,
            start,
            end: start + size.saturating_sub(1),
        }
    }
}

/// A page is the last one when it came back short. An empty page is short,
/// which is what ends collections whose size is an exact multiple of `size`.
pub fn is_last_page(returned: usize, size: u64) -> bool {
    (returned as u64) < size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds() {
        assert_eq!(Page::nth(0, 1000), Page { index: 0, start: 0, end: 999 });
        assert_eq!(Page::nth(2, 1000), Page { index: 2, start: 2000, end: 2999 });
    }

    #[test]
    fn short_and_empty_pages_end_pagination() {
        assert!(!is_last_page(1000, 1000));
        assert!(is_last_page(500, 1000));
        assert!(is_last_page(0, 1000));
    }
}
