use std::str::FromStr;

/// Which page of an ordered collection the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    /// 1-based page number.
    Number(u32),
    /// The last page for the current total.
    Latest,
}

impl FromStr for PageRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(PageRequest::Latest);
        }
        s.parse::<u32>()
            .map(PageRequest::Number)
            .map_err(|_| format!("invalid page: {}", s))
    }
}

/// Offset and optional limit over an ordered collection. `limit: None` means the whole set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Window {
    pub const ALL: Window = Window { offset: 0, limit: None };
}

/// Maps a page request onto a window. A page size of zero disables windowing.
pub fn compute_window(total: usize, page_size: usize, requested: Option<PageRequest>) -> Window {
    if page_size == 0 {
        return Window::ALL;
    }

    let page_index = match requested {
        Some(PageRequest::Number(n)) => n.saturating_sub(1) as usize,
        Some(PageRequest::Latest) => last_page_index(total, page_size),
        None => 0,
    };

    Window {
        offset: page_index * page_size,
        limit: Some(page_size),
    }
}

/// Zero-based index of the last page; 0 for an empty collection.
pub fn last_page_index(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size).saturating_sub(1)
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    total.div_ceil(page_size).max(1)
}
