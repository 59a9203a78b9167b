//! This module defines the common functionality for paging the entries list.

/// The config that controls how pages of entries are displayed.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// The number of entries per page when the request does not specify one.
    pub default_page_size: u32,
    /// How many numbered pages to show either side of the current page.
    pub surrounding_pages: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            surrounding_pages: 2,
        }
    }
}

/// One element of the pagination indicator under the entries table.
#[derive(Debug, PartialEq, Eq)]
pub enum PageMarker {
    /// A link to a page.
    Page(u32),
    /// The page being displayed.
    Current(u32),
    /// An ellipsis standing in for pages that are not shown.
    Gap,
}

/// Build the markers for the pagination indicator: the first and last
/// page are always shown, plus a window of pages around the current one,
/// with gaps in between where pages are skipped.
pub fn page_markers(current_page: u32, page_count: u32, surrounding_pages: u32) -> Vec<PageMarker> {
    let current_page = current_page.clamp(1, page_count.max(1));
    let window_start = current_page.saturating_sub(surrounding_pages).max(1);
    let window_end = current_page
        .saturating_add(surrounding_pages)
        .min(page_count);

    let mut markers = Vec::new();

    if window_start > 1 {
        markers.push(PageMarker::Page(1));

        if window_start > 2 {
            markers.push(PageMarker::Gap);
        }
    }

    for page in window_start..=window_end {
        if page == current_page {
            markers.push(PageMarker::Current(page));
        } else {
            markers.push(PageMarker::Page(page));
        }
    }

    if window_end < page_count {
        if window_end < page_count - 1 {
            markers.push(PageMarker::Gap);
        }

        markers.push(PageMarker::Page(page_count));
    }

    markers
}

/// The number of pages needed for `item_count` items.
pub fn page_count(item_count: u32, page_size: u32) -> u32 {
    item_count.div_ceil(page_size.max(1)).max(1)
}

#[cfg(test)]
mod pagination_tests {
    use super::{PageMarker, page_count, page_markers};

    #[test]
    fn small_page_counts_show_every_page() {
        let markers = page_markers(2, 3, 2);

        assert_eq!(
            markers,
            [
                PageMarker::Page(1),
                PageMarker::Current(2),
                PageMarker::Page(3),
            ]
        );
    }

    #[test]
    fn middle_page_gets_gaps_on_both_sides() {
        let markers = page_markers(10, 20, 1);

        assert_eq!(
            markers,
            [
                PageMarker::Page(1),
                PageMarker::Gap,
                PageMarker::Page(9),
                PageMarker::Current(10),
                PageMarker::Page(11),
                PageMarker::Gap,
                PageMarker::Page(20),
            ]
        );
    }

    #[test]
    fn window_touching_the_edges_has_no_gap() {
        let markers = page_markers(2, 10, 1);

        assert_eq!(
            markers,
            [
                PageMarker::Page(1),
                PageMarker::Current(2),
                PageMarker::Page(3),
                PageMarker::Gap,
                PageMarker::Page(10),
            ]
        );
    }

    #[test]
    fn window_start_is_clamped_to_first_page() {
        let markers = page_markers(1, 5, 2);

        assert_eq!(
            markers,
            [
                PageMarker::Current(1),
                PageMarker::Page(2),
                PageMarker::Page(3),
                PageMarker::Gap,
                PageMarker::Page(5),
            ]
        );
    }

    #[test]
    fn out_of_range_page_is_clamped() {
        let markers = page_markers(99, 3, 1);

        assert_eq!(
            markers,
            [
                PageMarker::Page(1),
                PageMarker::Page(2),
                PageMarker::Current(3),
            ]
        );
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0, 20), 1);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
    }
}
