use std::collections::BTreeMap;

use crate::models::{QueryClass, ResultPage};

#[derive(Clone, Debug, Eq, PartialEq)]
struct CacheScope {
    class: QueryClass,
    page_size: u32,
}

/// Pages fetched for one query class at one page size. A scope change
/// empties the cache before anything else can read it.
#[derive(Debug, Default)]
pub struct ResultPageCache {
    scope: Option<CacheScope>,
    pages: BTreeMap<u32, ResultPage>,
}

impl ResultPageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the cache to `class` and `page_size`, clearing it when either
    /// differs from the current binding. Returns whether pages were dropped.
    pub fn bind(&mut self, class: &QueryClass, page_size: u32) -> bool {
        let scope = CacheScope {
            class: class.clone(),
            page_size,
        };
        if self.scope.as_ref() == Some(&scope) {
            return false;
        }
        let dropped = !self.pages.is_empty();
        self.pages.clear();
        self.scope = Some(scope);
        dropped
    }

    pub fn is_bound_to(&self, class: &QueryClass, page_size: u32) -> bool {
        self.scope
            .as_ref()
            .is_some_and(|scope| scope.class == *class && scope.page_size == page_size)
    }

    pub fn get(&self, page: u32) -> Option<&ResultPage> {
        self.pages.get(&page)
    }

    pub fn put(&mut self, page: u32, result: ResultPage) {
        self.pages.insert(page, result);
    }

    pub fn invalidate(&mut self, page: u32) -> bool {
        self.pages.remove(&page).is_some()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.scope = None;
    }

    pub fn pages(&self) -> impl Iterator<Item = (u32, &ResultPage)> {
        self.pages.iter().map(|(page, result)| (*page, result))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ResultPageCache;
    use crate::models::{Pagination, ResultPage, SearchQuery};

    fn page(number: u32) -> ResultPage {
        ResultPage::new(Vec::new(), Pagination::for_total(number, 20, 100), 100)
    }

    #[test]
    fn rebinding_to_another_class_drops_pages() {
        let mut cache = ResultPageCache::new();
        let engineers = SearchQuery::new(["engineer"]).class();
        let designers = SearchQuery::new(["designer"]).class();

        assert!(!cache.bind(&engineers, 20));
        cache.put(1, page(1));
        cache.put(2, page(2));

        assert!(!cache.bind(&engineers, 20));
        assert_eq!(cache.len(), 2);

        assert!(cache.bind(&designers, 20));
        assert!(cache.get(1).is_none());
        assert!(cache.is_bound_to(&designers, 20));
    }

    #[test]
    fn page_size_change_drops_pages() {
        let mut cache = ResultPageCache::new();
        let class = SearchQuery::new(["engineer"]).class();
        cache.bind(&class, 20);
        cache.put(1, page(1));

        assert!(cache.bind(&class, 25));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_unbinds_scope() {
        let mut cache = ResultPageCache::new();
        let class = SearchQuery::new(["engineer"]).class();
        cache.bind(&class, 20);
        cache.put(1, page(1));
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.is_bound_to(&class, 20));
    }
}
