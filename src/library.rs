use std::cmp::Reverse;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::bookmark::Bookmark;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    LastVisit,
    Favorites,
    MoreVisits,
    Inactive,
    NeverVisited,
}

impl SortOrder {
    pub const ALL: [SortOrder; 7] = [
        SortOrder::Newest,
        SortOrder::Oldest,
        SortOrder::LastVisit,
        SortOrder::Favorites,
        SortOrder::MoreVisits,
        SortOrder::Inactive,
        SortOrder::NeverVisited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::LastVisit => "last_visit",
            SortOrder::Favorites => "favorites",
            SortOrder::MoreVisits => "more_visits",
            SortOrder::Inactive => "inactive",
            SortOrder::NeverVisited => "never_visited",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOrder::Newest => "Newest",
            SortOrder::Oldest => "Oldest",
            SortOrder::LastVisit => "Last visited",
            SortOrder::Favorites => "Favorites",
            SortOrder::MoreVisits => "Most visited",
            SortOrder::Inactive => "Inactive",
            SortOrder::NeverVisited => "Never visited",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|order| order.as_str() == raw.trim())
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|o| o == self).unwrap_or(0)
    }
}

/// All bookmarks of the active repository plus the filter, sort and page
/// that select the visible slice.
#[derive(Debug, Clone)]
pub struct Library {
    all: Vec<Bookmark>,
    view: Vec<usize>,
    query: String,
    tag: Option<String>,
    sort: SortOrder,
    page: usize,
    per_page: usize,
}

impl Library {
    pub fn new(per_page: usize) -> Self {
        Self {
            all: Vec::new(),
            view: Vec::new(),
            query: String::new(),
            tag: None,
            sort: SortOrder::default(),
            page: 1,
            per_page: per_page.max(1),
        }
    }

    pub fn set_bookmarks(&mut self, bookmarks: Vec<Bookmark>) {
        self.all = bookmarks;
        self.rebuild();
    }

    /// Replaces one bookmark in place without re-sorting.
    pub fn update(&mut self, bookmark: Bookmark) {
        if let Some(existing) = self.all.iter_mut().find(|b| b.id == bookmark.id) {
            *existing = bookmark;
        }
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.trim().to_string();
        self.page = 1;
        self.rebuild();
    }

    pub fn set_tag(&mut self, tag: Option<&str>) {
        self.tag = tag
            .map(|t| t.trim().trim_start_matches('#').to_string())
            .filter(|t| !t.is_empty());
        self.page = 1;
        self.rebuild();
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
        self.page = 1;
        self.rebuild();
    }

    pub fn set_per_page(&mut self, per_page: usize) {
        self.per_page = per_page.max(1);
        self.page = self.page.min(self.page_count());
    }

    pub fn get(&self, id: u64) -> Option<&Bookmark> {
        self.all.iter().find(|b| b.id == id)
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn sort(&self) -> SortOrder {
        self.sort
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn total(&self) -> usize {
        self.all.len()
    }

    pub fn matching(&self) -> usize {
        self.view.len()
    }

    pub fn page_count(&self) -> usize {
        self.view.len().div_ceil(self.per_page).max(1)
    }

    pub fn next_page(&mut self) -> bool {
        if self.page < self.page_count() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.page > 1 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    pub fn visible(&self) -> Vec<Bookmark> {
        let start = (self.page - 1) * self.per_page;
        self.view
            .iter()
            .skip(start)
            .take(self.per_page)
            .filter_map(|index| self.all.get(*index).cloned())
            .collect()
    }

    /// Every distinct tag in the repository, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.all
            .iter()
            .flat_map(|b| b.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn rebuild(&mut self) {
        let words: Vec<String> = self
            .query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let mut view: Vec<usize> = self
            .all
            .iter()
            .enumerate()
            .filter(|(_, b)| self.tag.as_deref().map(|t| b.has_tag(t)).unwrap_or(true))
            .filter(|(_, b)| matches_query(b, &words))
            .filter(|(_, b)| self.sort != SortOrder::NeverVisited || b.visit_count == 0)
            .map(|(index, _)| index)
            .collect();

        let all = &self.all;
        match self.sort {
            SortOrder::Newest | SortOrder::NeverVisited => {
                view.sort_by_key(|i| Reverse((all[*i].created_at.clone(), all[*i].id)))
            }
            SortOrder::Oldest => view.sort_by_key(|i| (all[*i].created_at.clone(), all[*i].id)),
            SortOrder::LastVisit => view.sort_by_key(|i| Reverse(all[*i].last_visit.clone())),
            SortOrder::Favorites => view.sort_by_key(|i| !all[*i].favorite),
            SortOrder::MoreVisits => view.sort_by_key(|i| Reverse(all[*i].visit_count)),
            SortOrder::Inactive => view.sort_by_key(|i| all[*i].is_active),
        }

        self.view = view;
        self.page = self.page.clamp(1, self.page_count());
    }
}

fn matches_query(bookmark: &Bookmark, words: &[String]) -> bool {
    if words.is_empty() {
        return true;
    }
    let haystack = format!(
        "{} {} {} {}",
        bookmark.title,
        bookmark.url,
        bookmark.desc,
        bookmark.tags.join(",")
    )
    .to_lowercase();
    words.iter().all(|word| haystack.contains(word.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(id: u64, title: &str, tags: &[&str]) -> Bookmark {
        Bookmark {
            id,
            url: format!("https://example.com/{id}"),
            title: title.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: format!("202401{:02}000000", id),
            is_active: true,
            ..Bookmark::default()
        }
    }

    fn sample() -> Library {
        let mut lib = Library::new(2);
        lib.set_bookmarks(vec![
            bookmark(1, "Rust book", &["rust", "docs"]),
            bookmark(2, "Go tour", &["go"]),
            bookmark(3, "Rust by example", &["rust"]),
            bookmark(4, "Zig", &["zig"]),
            bookmark(5, "Ratatui", &["rust", "tui"]),
        ]);
        lib
    }

    fn ids(lib: &Library) -> Vec<u64> {
        lib.visible().iter().map(|b| b.id).collect()
    }

    #[test]
    fn newest_first_and_paginated() {
        let mut lib = sample();
        assert_eq!(lib.page_count(), 3);
        assert_eq!(ids(&lib), vec![5, 4]);
        assert!(lib.next_page());
        assert_eq!(ids(&lib), vec![3, 2]);
        assert!(lib.next_page());
        assert!(!lib.next_page());
        assert_eq!(ids(&lib), vec![1]);
        assert!(lib.prev_page());
        assert_eq!(lib.page(), 2);
    }

    #[test]
    fn query_needs_every_word() {
        let mut lib = sample();
        lib.set_query("rust EXAMPLE");
        assert_eq!(ids(&lib), vec![3]);
        lib.set_query("");
        assert_eq!(lib.matching(), 5);
    }

    #[test]
    fn tag_filter_is_case_insensitive_and_strips_hash() {
        let mut lib = sample();
        lib.set_tag(Some("#RUST"));
        assert_eq!(lib.matching(), 3);
        lib.set_tag(Some("  "));
        assert_eq!(lib.tag(), None);
    }

    #[test]
    fn sort_orders() {
        let mut lib = sample();
        lib.set_per_page(10);
        lib.set_sort(SortOrder::Oldest);
        assert_eq!(ids(&lib), vec![1, 2, 3, 4, 5]);

        let mut favorite = bookmark(4, "Zig", &["zig"]);
        favorite.favorite = true;
        favorite.visit_count = 3;
        lib.update(favorite);
        lib.set_sort(SortOrder::Favorites);
        assert_eq!(ids(&lib)[0], 4);
        lib.set_sort(SortOrder::MoreVisits);
        assert_eq!(ids(&lib)[0], 4);
        lib.set_sort(SortOrder::NeverVisited);
        assert_eq!(ids(&lib), vec![5, 3, 2, 1]);
    }

    #[test]
    fn sort_order_names_round_trip_through_parse() {
        for order in SortOrder::ALL {
            assert_eq!(SortOrder::parse(order.as_str()), Some(order));
        }
        assert_eq!(SortOrder::parse("bogus"), None);
    }

    #[test]
    fn shrinking_results_clamps_page() {
        let mut lib = sample();
        lib.next_page();
        lib.next_page();
        lib.set_bookmarks(vec![bookmark(1, "only", &[])]);
        assert_eq!(lib.page(), 1);
        assert_eq!(lib.tags(), Vec::<String>::new());
    }
}
