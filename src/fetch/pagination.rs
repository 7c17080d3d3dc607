//! Pagination arithmetic.
//!
//! Pure helpers shared by the fetcher: page size clamping, query-string
//! injection, and the plan of remaining pages split into chunks.

/// Page size used when none is configured.
pub const DEFAULT_PER_PAGE: u64 = 100;
pub const MIN_PER_PAGE: u64 = 100;
pub const MAX_PER_PAGE: u64 = 1000;

/// Clamp a configured page size into `[100, 1000]`.
pub fn effective_per_page(configured: Option<u64>) -> u64 {
    configured
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(MIN_PER_PAGE, MAX_PER_PAGE)
}

/// Raw value of query parameter `name` in `endpoint`, matched by exact name.
pub fn query_param<'a>(endpoint: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = endpoint.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Value of a caller-supplied `per_page` query parameter, if any.
pub fn caller_per_page(endpoint: &str) -> Option<u64> {
    query_param(endpoint, "per_page")
        .and_then(|value| value.parse().ok())
        .filter(|n| *n > 0)
}

/// Whether the caller pinned a single page with its own `page` parameter.
pub fn caller_pins_page(endpoint: &str) -> bool {
    query_param(endpoint, "page").is_some()
}

/// Add the pagination parameters the endpoint does not already carry.
///
/// A caller `per_page` is kept and only `page` is appended. An endpoint with
/// its own `page` is returned unchanged.
pub fn paginate_endpoint(endpoint: &str, page: u64, per_page: u64) -> String {
    if caller_pins_page(endpoint) {
        return endpoint.to_string();
    }
    let mut url = endpoint.to_string();
    if !url.contains('?') {
        url.push('?');
    }
    if !url.ends_with('?') && !url.ends_with('&') {
        url.push('&');
    }
    if query_param(endpoint, "per_page").is_some() {
        url.push_str(&format!("page={page}"));
    } else {
        url.push_str(&format!("page={page}&per_page={per_page}"));
    }
    url
}

/// Number of pages needed to hold `total` records.
pub fn total_pages(total: u64, per_page: u64) -> u64 {
    if per_page == 0 {
        return 0;
    }
    total.div_ceil(per_page)
}

/// The pages still to fetch after page 1, grouped into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub chunks: Vec<Vec<u64>>,
}

impl PagePlan {
    pub fn new(total: u64, per_page: u64, chunk_size: usize) -> Self {
        let last = total_pages(total, per_page);
        let remaining: Vec<u64> = (2..=last).collect();
        Self {
            chunks: chunk(&remaining, chunk_size),
        }
    }

    /// Count of remaining pages across all chunks.
    pub fn page_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Split `items` into order-preserving chunks of at most `size` (at least 1).
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}
