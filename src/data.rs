use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;

use crate::api;
use crate::bookmark::{ArchiveSnapshot, Bookmark, NewBookmark, QrPayload, RepoStats, ScrapeResult};

pub trait BookmarkService: Send + Sync {
    fn list(&self, db: &str) -> Result<Vec<Bookmark>>;
    fn get(&self, db: &str, id: u64) -> Result<Bookmark>;
    fn tags(&self, db: &str) -> Result<BTreeMap<String, usize>>;
    fn create(&self, db: &str, bookmark: &NewBookmark) -> Result<String>;
    fn update(&self, db: &str, bookmark: &Bookmark) -> Result<String>;
    fn delete(&self, db: &str, id: u64) -> Result<String>;
    /// Flips the favorite flag and returns the bookmark as stored afterwards.
    fn toggle_favorite(&self, db: &str, id: u64) -> Result<Bookmark>;
    fn add_visit(&self, db: &str, id: u64) -> Result<()>;
    fn update_notes(&self, db: &str, id: u64, notes: &str) -> Result<String>;
    fn check_status(&self, db: &str, id: u64) -> Result<Bookmark>;
}

pub trait RepoService: Send + Sync {
    fn list(&self) -> Result<Vec<RepoStats>>;
    fn create(&self, name: &str) -> Result<String>;
    fn delete(&self, name: &str) -> Result<String>;
}

/// Server-side helpers that are not tied to a repository.
pub trait ToolService: Send + Sync {
    fn scrape(&self, url: &str) -> Result<ScrapeResult>;
    fn archive(&self, url: &str) -> Result<Option<ArchiveSnapshot>>;
    fn qr(&self, url: &str, size: u32) -> Result<QrPayload>;
}

pub struct ApiBookmarkService {
    client: Arc<api::Client>,
}

impl ApiBookmarkService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl BookmarkService for ApiBookmarkService {
    fn list(&self, db: &str) -> Result<Vec<Bookmark>> {
        self.client
            .bookmarks(db)
            .with_context(|| format!("load bookmarks of {db}"))
    }

    fn get(&self, db: &str, id: u64) -> Result<Bookmark> {
        self.client
            .bookmark(db, id)
            .with_context(|| format!("load bookmark #{id}"))
    }

    fn tags(&self, db: &str) -> Result<BTreeMap<String, usize>> {
        self.client.tags(db).context("load tags")
    }

    fn create(&self, db: &str, bookmark: &NewBookmark) -> Result<String> {
        Ok(self.client.create(db, bookmark)?.message)
    }

    fn update(&self, db: &str, bookmark: &Bookmark) -> Result<String> {
        Ok(self.client.update(db, bookmark)?.message)
    }

    fn delete(&self, db: &str, id: u64) -> Result<String> {
        Ok(self.client.delete(db, id)?.message)
    }

    fn toggle_favorite(&self, db: &str, id: u64) -> Result<Bookmark> {
        self.client.toggle_favorite(db, id)?;
        self.client
            .bookmark(db, id)
            .with_context(|| format!("reload bookmark #{id}"))
    }

    fn add_visit(&self, db: &str, id: u64) -> Result<()> {
        self.client.add_visit(db, id)?;
        Ok(())
    }

    fn update_notes(&self, db: &str, id: u64, notes: &str) -> Result<String> {
        Ok(self.client.update_notes(db, id, notes)?.message)
    }

    fn check_status(&self, db: &str, id: u64) -> Result<Bookmark> {
        self.client
            .check_status(db, id)
            .with_context(|| format!("check status of #{id}"))
    }
}

pub struct ApiRepoService {
    client: Arc<api::Client>,
}

impl ApiRepoService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl RepoService for ApiRepoService {
    fn list(&self) -> Result<Vec<RepoStats>> {
        self.client.repo_all().context("list repositories")
    }

    fn create(&self, name: &str) -> Result<String> {
        Ok(self.client.repo_create(name)?.message)
    }

    fn delete(&self, name: &str) -> Result<String> {
        Ok(self.client.repo_delete(name)?.message)
    }
}

pub struct ApiToolService {
    client: Arc<api::Client>,
}

impl ApiToolService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ToolService for ApiToolService {
    fn scrape(&self, url: &str) -> Result<ScrapeResult> {
        self.client.scrape(url).context("scrape url")
    }

    fn archive(&self, url: &str) -> Result<Option<ArchiveSnapshot>> {
        self.client.archive(url).context("look up archive snapshot")
    }

    fn qr(&self, url: &str, size: u32) -> Result<QrPayload> {
        self.client.qr(url, size).context("generate qr code")
    }
}

/// In-memory repositories for offline runs and tests. Deleting renumbers the
/// remaining ids the way the server does.
#[derive(Default)]
pub struct MockBookmarkService {
    repos: Mutex<BTreeMap<String, Vec<Bookmark>>>,
}

impl MockBookmarkService {
    pub fn with_bookmarks(db: &str, bookmarks: Vec<Bookmark>) -> Self {
        let service = Self::default();
        service.repos.lock().insert(db.to_string(), bookmarks);
        service
    }

    pub fn sample() -> Self {
        let items = [
            ("https://www.rust-lang.org", "Rust", "A language empowering everyone.", "rust,lang"),
            ("https://docs.rs", "Docs.rs", "Documentation for crates.", "rust,docs"),
            ("https://ratatui.rs", "Ratatui", "Terminal user interfaces.", "rust,tui"),
            ("https://github.com", "GitHub", "Where software is built.", "git,code"),
            ("https://news.ycombinator.com", "Hacker News", "", "news"),
        ];
        let bookmarks = items
            .iter()
            .enumerate()
            .map(|(i, (url, title, desc, tags))| Bookmark {
                id: i as u64 + 1,
                url: url.to_string(),
                title: title.to_string(),
                desc: desc.to_string(),
                tags: crate::bookmark::parse_tags(tags),
                created_at: format!("2024010{}120000", i + 1),
                is_active: true,
                ..Bookmark::default()
            })
            .collect();
        Self::with_bookmarks("main", bookmarks)
    }

    fn with_repo<T>(&self, db: &str, f: impl FnOnce(&mut Vec<Bookmark>) -> Result<T>) -> Result<T> {
        let mut repos = self.repos.lock();
        let repo = repos
            .get_mut(db)
            .ok_or_else(|| anyhow!("repository {db} not found"))?;
        f(repo)
    }
}

fn find_mut(repo: &mut [Bookmark], id: u64) -> Result<&mut Bookmark> {
    repo.iter_mut()
        .find(|b| b.id == id)
        .ok_or_else(|| anyhow!("bookmark #{id} not found"))
}

impl BookmarkService for MockBookmarkService {
    fn list(&self, db: &str) -> Result<Vec<Bookmark>> {
        self.with_repo(db, |repo| Ok(repo.clone()))
    }

    fn get(&self, db: &str, id: u64) -> Result<Bookmark> {
        self.with_repo(db, |repo| Ok(find_mut(repo, id)?.clone()))
    }

    fn tags(&self, db: &str) -> Result<BTreeMap<String, usize>> {
        self.with_repo(db, |repo| {
            let mut tags = BTreeMap::new();
            for tag in repo.iter().flat_map(|b| b.tags.iter()) {
                *tags.entry(tag.clone()).or_insert(0) += 1;
            }
            Ok(tags)
        })
    }

    fn create(&self, db: &str, bookmark: &NewBookmark) -> Result<String> {
        self.with_repo(db, |repo| {
            if repo.iter().any(|b| b.url == bookmark.url) {
                bail!("bookmark already exists");
            }
            repo.push(Bookmark {
                id: repo.len() as u64 + 1,
                url: bookmark.url.clone(),
                title: bookmark.title.clone(),
                desc: bookmark.desc.clone(),
                tags: bookmark.tags.clone(),
                favicon_url: bookmark.favicon_url.clone(),
                is_active: true,
                ..Bookmark::default()
            });
            Ok("bookmark created".to_string())
        })
    }

    fn update(&self, db: &str, bookmark: &Bookmark) -> Result<String> {
        self.with_repo(db, |repo| {
            let current = find_mut(repo, bookmark.id)?;
            if current == bookmark {
                bail!("no changes found");
            }
            *current = bookmark.clone();
            Ok("bookmark updated".to_string())
        })
    }

    fn delete(&self, db: &str, id: u64) -> Result<String> {
        self.with_repo(db, |repo| {
            let before = repo.len();
            repo.retain(|b| b.id != id);
            if repo.len() == before {
                bail!("bookmark #{id} not found");
            }
            for (i, bookmark) in repo.iter_mut().enumerate() {
                bookmark.id = i as u64 + 1;
            }
            Ok("bookmark deleted".to_string())
        })
    }

    fn toggle_favorite(&self, db: &str, id: u64) -> Result<Bookmark> {
        self.with_repo(db, |repo| {
            let bookmark = find_mut(repo, id)?;
            bookmark.favorite = !bookmark.favorite;
            Ok(bookmark.clone())
        })
    }

    fn add_visit(&self, db: &str, id: u64) -> Result<()> {
        self.with_repo(db, |repo| {
            find_mut(repo, id)?.visit_count += 1;
            Ok(())
        })
    }

    fn update_notes(&self, db: &str, id: u64, notes: &str) -> Result<String> {
        self.with_repo(db, |repo| {
            find_mut(repo, id)?.notes = notes.to_string();
            Ok("notes updated".to_string())
        })
    }

    fn check_status(&self, db: &str, id: u64) -> Result<Bookmark> {
        self.with_repo(db, |repo| {
            let bookmark = find_mut(repo, id)?;
            bookmark.status_code = 200;
            bookmark.status_text = "OK".into();
            Ok(bookmark.clone())
        })
    }
}

/// Repository listing backed by a [`MockBookmarkService`].
pub struct MockRepoService {
    bookmarks: Arc<MockBookmarkService>,
}

impl MockRepoService {
    pub fn new(bookmarks: Arc<MockBookmarkService>) -> Self {
        Self { bookmarks }
    }
}

impl RepoService for MockRepoService {
    fn list(&self) -> Result<Vec<RepoStats>> {
        let repos = self.bookmarks.repos.lock();
        Ok(repos
            .iter()
            .map(|(name, items)| RepoStats {
                name: name.clone(),
                bookmarks: items.len(),
                tags: items
                    .iter()
                    .flat_map(|b| b.tags.iter())
                    .collect::<std::collections::BTreeSet<_>>()
                    .len(),
                favorites: items.iter().filter(|b| b.favorite).count(),
            })
            .collect())
    }

    fn create(&self, name: &str) -> Result<String> {
        let mut repos = self.bookmarks.repos.lock();
        if repos.contains_key(name) {
            bail!("repository {name} already exists");
        }
        repos.insert(name.to_string(), Vec::new());
        Ok(format!("repository {name} created"))
    }

    fn delete(&self, name: &str) -> Result<String> {
        if self.bookmarks.repos.lock().remove(name).is_none() {
            bail!("repository {name} not found");
        }
        Ok(format!("repository {name} deleted"))
    }
}

#[derive(Default)]
pub struct MockToolService;

impl ToolService for MockToolService {
    fn scrape(&self, url: &str) -> Result<ScrapeResult> {
        Ok(ScrapeResult {
            title: format!("Page at {url}"),
            ..ScrapeResult::default()
        })
    }

    fn archive(&self, _url: &str) -> Result<Option<ArchiveSnapshot>> {
        Ok(None)
    }

    fn qr(&self, _url: &str, _size: u32) -> Result<QrPayload> {
        bail!("qr codes are not available offline")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_delete_renumbers_ids() {
        let service = MockBookmarkService::sample();
        service.delete("main", 2).unwrap();
        let ids: Vec<u64> = service.list("main").unwrap().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(service.get("main", 2).unwrap().title, "Ratatui");
    }

    #[test]
    fn mock_update_without_changes_fails() {
        let service = MockBookmarkService::sample();
        let current = service.get("main", 1).unwrap();
        let err = service.update("main", &current).unwrap_err();
        assert_eq!(err.to_string(), "no changes found");
    }

    #[test]
    fn mock_tags_are_counted() {
        let service = MockBookmarkService::sample();
        let tags = service.tags("main").unwrap();
        assert_eq!(tags.get("rust"), Some(&3));
        assert!(service.tags("missing").is_err());
    }

    #[test]
    fn mock_repos_follow_bookmark_store() {
        let bookmarks = Arc::new(MockBookmarkService::sample());
        let repos = MockRepoService::new(bookmarks.clone());
        repos.create("work").unwrap();
        assert!(repos.create("work").is_err());
        let stats = repos.list().unwrap();
        assert_eq!(stats.len(), 2);
        let main = stats.iter().find(|s| s.name == "main").unwrap();
        assert_eq!(main.bookmarks, 5);
        repos.delete("work").unwrap();
        assert!(bookmarks.list("work").is_err());
    }
}
