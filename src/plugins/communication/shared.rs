use serde::{Serialize, Deserialize};

/// One page of a paginated listing.
#[derive(Serialize, Deserialize, Debug)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl<T> ListResponse<T> {
    /// `page` is 1-based; `per_page` must be non-zero.
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: i64) -> Self {
        let per_page_i = i64::from(per_page.max(1));
        let offset = i64::from(page.saturating_sub(1)) * per_page_i;
        let has_more = offset + (items.len() as i64) < total;
        let total_pages = if total == 0 { 0 } else { (total + per_page_i - 1) / per_page_i };
        Self { items, page, per_page, total, total_pages, has_more }
    }
}
