use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use unicode_width::UnicodeWidthStr;

use crate::bookmark::{self, Bookmark, NewBookmark, ScrapeResult, UNTITLED};
use crate::config::DropdownKeys;
use crate::keys::KeyPress;

/// Delay between the last URL edit and the scrape request.
pub const SCRAPE_DEBOUNCE: Duration = Duration::from_millis(500);
pub const MAX_SUGGESTIONS: usize = 10;

/// Single-line text input with a character cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextField {
    value: String,
    cursor: usize,
}

impl TextField {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            cursor: value.chars().count(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set(&mut self, value: &str) {
        self.value = value.to_string();
        self.cursor = self.value.chars().count();
    }

    pub fn clear(&mut self) {
        self.set("");
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }

    /// Display column of the cursor.
    pub fn cursor_column(&self) -> usize {
        let prefix: String = self.value.chars().take(self.cursor).collect();
        UnicodeWidthStr::width(prefix.as_str())
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_index)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    pub fn insert(&mut self, ch: char) {
        let at = self.byte_index(self.cursor);
        self.value.insert(at, ch);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let at = self.byte_index(self.cursor);
        self.value.remove(at);
        true
    }

    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.value.chars().count() {
            return false;
        }
        let at = self.byte_index(self.cursor);
        self.value.remove(at);
        true
    }

    /// Applies an editing key. Returns whether the value changed.
    pub fn handle_key(&mut self, press: &KeyPress) -> bool {
        if press.is_ctrl("u") && !press.shift {
            let changed = !self.value.is_empty();
            self.clear();
            return changed;
        }
        if press.is_ctrl("a") {
            self.cursor = 0;
            return false;
        }
        if press.is_ctrl("e") {
            self.cursor = self.value.chars().count();
            return false;
        }
        match press.key.as_str() {
            "Backspace" => self.backspace(),
            "Delete" => self.delete(),
            "ArrowLeft" => {
                self.cursor = self.cursor.saturating_sub(1);
                false
            }
            "ArrowRight" => {
                self.cursor = (self.cursor + 1).min(self.value.chars().count());
                false
            }
            "Home" => {
                self.cursor = 0;
                false
            }
            "End" => {
                self.cursor = self.value.chars().count();
                false
            }
            _ => match press.text_char() {
                Some(ch) => {
                    self.insert(ch);
                    true
                }
                None => false,
            },
        }
    }
}

/// A deadline that restarts on every `arm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once, when the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub name: String,
    pub count: usize,
}

/// Suggests existing tags for the token being typed in a tags field.
pub struct TagAutocomplete {
    tags: BTreeMap<String, usize>,
    query: String,
    suggestions: Vec<Suggestion>,
    selected: Option<usize>,
    open: bool,
    matcher: SkimMatcherV2,
}

impl std::fmt::Debug for TagAutocomplete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagAutocomplete")
            .field("query", &self.query)
            .field("suggestions", &self.suggestions)
            .field("selected", &self.selected)
            .field("open", &self.open)
            .finish()
    }
}

impl Default for TagAutocomplete {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl TagAutocomplete {
    pub fn new(tags: BTreeMap<String, usize>) -> Self {
        Self {
            tags,
            query: String::new(),
            suggestions: Vec::new(),
            selected: None,
            open: false,
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn set_tags(&mut self, tags: BTreeMap<String, usize>) {
        self.tags = tags;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn hide(&mut self) {
        self.open = false;
        self.selected = None;
    }

    /// Recomputes suggestions for the last token of `input`.
    pub fn update(&mut self, input: &str) {
        let ends_with_separator = input
            .chars()
            .last()
            .map(|c| c.is_whitespace() || c == ',')
            .unwrap_or(true);
        self.query = if ends_with_separator {
            String::new()
        } else {
            last_token(input).to_lowercase()
        };
        self.selected = None;
        if self.query.is_empty() {
            self.suggestions.clear();
            self.open = false;
            return;
        }

        let mut scored: Vec<(i64, Suggestion)> = self
            .tags
            .iter()
            .filter_map(|(name, count)| {
                self.matcher.fuzzy_match(name, &self.query).map(|score| {
                    (
                        score,
                        Suggestion {
                            name: name.clone(),
                            count: *count,
                        },
                    )
                })
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        self.suggestions = scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, s)| s)
            .collect();
        self.open = true;
    }

    pub fn move_selection(&mut self, delta: i64) {
        if self.suggestions.is_empty() {
            return;
        }
        let len = self.suggestions.len() as i64;
        let current = self.selected.map(|i| i as i64).unwrap_or(-1);
        self.selected = Some((current + delta).rem_euclid(len) as usize);
    }

    /// Replaces the last token of `input` with the highlighted tag.
    pub fn accept(&mut self, input: &str) -> Option<String> {
        let tag = self.selected.and_then(|i| self.suggestions.get(i))?.name.clone();
        let token = last_token(input);
        let head = &input[..input.len() - token.len()];
        self.hide();
        Some(format!("{head}{tag}, "))
    }
}

fn last_token(input: &str) -> &str {
    input
        .rsplit(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    New,
    Edit(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Url,
    Title,
    Description,
    Tags,
}

impl FormField {
    pub const ALL: [FormField; 4] = [
        FormField::Url,
        FormField::Title,
        FormField::Description,
        FormField::Tags,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FormField::Url => "URL",
            FormField::Title => "Title",
            FormField::Description => "Description",
            FormField::Tags => "Tags",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormStatus {
    Editing,
    Submitting,
    Failed(String),
    Saved(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormAction {
    None,
    Changed,
    Submit,
}

#[derive(Debug)]
pub struct BookmarkForm {
    kind: FormKind,
    url: TextField,
    title: TextField,
    desc: TextField,
    tags: TextField,
    favicon_url: String,
    focus: FormField,
    status: FormStatus,
    original: Option<Bookmark>,
    scrape: Debounce,
    pub autocomplete: TagAutocomplete,
}

impl BookmarkForm {
    pub fn new_bookmark(url: Option<&str>, tags: BTreeMap<String, usize>, now: Instant) -> Self {
        let mut form = Self {
            kind: FormKind::New,
            url: TextField::new(url.unwrap_or("")),
            title: TextField::default(),
            desc: TextField::default(),
            tags: TextField::default(),
            favicon_url: String::new(),
            focus: FormField::Url,
            status: FormStatus::Editing,
            original: None,
            scrape: Debounce::new(SCRAPE_DEBOUNCE),
            autocomplete: TagAutocomplete::new(tags),
        };
        if url.map(bookmark::is_valid_url).unwrap_or(false) {
            form.scrape.arm(now);
            form.focus = FormField::Title;
        }
        form
    }

    pub fn edit(bookmark: &Bookmark, tags: BTreeMap<String, usize>) -> Self {
        Self {
            kind: FormKind::Edit(bookmark.id),
            url: TextField::new(&bookmark.url),
            title: TextField::new(&bookmark.title),
            desc: TextField::new(&bookmark.desc),
            tags: TextField::new(&bookmark::format_tags(&bookmark.tags)),
            favicon_url: bookmark.favicon_url.clone(),
            focus: FormField::Title,
            status: FormStatus::Editing,
            original: Some(bookmark.clone()),
            scrape: Debounce::new(SCRAPE_DEBOUNCE),
            autocomplete: TagAutocomplete::new(tags),
        }
    }

    pub fn kind(&self) -> FormKind {
        self.kind
    }

    pub fn focus(&self) -> FormField {
        self.focus
    }

    pub fn status(&self) -> &FormStatus {
        &self.status
    }

    pub fn is_locked(&self) -> bool {
        self.status == FormStatus::Submitting
    }

    pub fn field(&self, field: FormField) -> &TextField {
        match field {
            FormField::Url => &self.url,
            FormField::Title => &self.title,
            FormField::Description => &self.desc,
            FormField::Tags => &self.tags,
        }
    }

    fn field_mut(&mut self, field: FormField) -> &mut TextField {
        match field {
            FormField::Url => &mut self.url,
            FormField::Title => &mut self.title,
            FormField::Description => &mut self.desc,
            FormField::Tags => &mut self.tags,
        }
    }

    pub fn focus_next(&mut self) {
        let i = FormField::ALL.iter().position(|f| *f == self.focus).unwrap_or(0);
        self.focus = FormField::ALL[(i + 1) % FormField::ALL.len()];
        self.autocomplete.hide();
    }

    pub fn focus_prev(&mut self) {
        let i = FormField::ALL.iter().position(|f| *f == self.focus).unwrap_or(0);
        self.focus = FormField::ALL[(i + FormField::ALL.len() - 1) % FormField::ALL.len()];
        self.autocomplete.hide();
    }

    /// Handles a key while one of the form inputs has focus.
    pub fn handle_key(&mut self, press: &KeyPress, dropdown: &DropdownKeys, now: Instant) -> FormAction {
        if self.is_locked() {
            return FormAction::None;
        }

        if self.focus == FormField::Tags && self.autocomplete.is_open() {
            if let Some(action) = self.handle_dropdown_key(press, dropdown) {
                return action;
            }
        }

        if press.is_ctrl("s") {
            return FormAction::Submit;
        }
        if dropdown.tab_shift.matches(press) {
            self.focus_prev();
            return FormAction::None;
        }
        if dropdown.tab.matches(press) {
            self.focus_next();
            return FormAction::None;
        }
        if press.is_plain("Enter") {
            if self.focus == FormField::Tags {
                return FormAction::Submit;
            }
            self.focus_next();
            return FormAction::None;
        }

        let focus = self.focus;
        if !self.field_mut(focus).handle_key(press) {
            return FormAction::None;
        }
        if matches!(self.status, FormStatus::Failed(_) | FormStatus::Saved(_)) {
            self.status = FormStatus::Editing;
        }
        match focus {
            FormField::Url if self.kind == FormKind::New => self.scrape.arm(now),
            FormField::Tags => {
                let value = self.tags.value().to_string();
                self.autocomplete.update(&value);
            }
            _ => {}
        }
        FormAction::Changed
    }

    fn handle_dropdown_key(&mut self, press: &KeyPress, dropdown: &DropdownKeys) -> Option<FormAction> {
        let has_selection = self.autocomplete.selected().is_some();
        if press.is_plain("Escape") {
            self.autocomplete.hide();
            return Some(FormAction::None);
        }
        if press.is_plain("ArrowDown") || dropdown.down_ctrl.matches(press) {
            self.autocomplete.move_selection(1);
            return Some(FormAction::None);
        }
        if press.is_plain("ArrowUp") || dropdown.up_ctrl.matches(press) {
            self.autocomplete.move_selection(-1);
            return Some(FormAction::None);
        }
        let tabbing = dropdown.tab.matches(press) || dropdown.tab_shift.matches(press);
        if tabbing && !has_selection {
            let delta = if press.shift { -1 } else { 1 };
            self.autocomplete.move_selection(delta);
            return Some(FormAction::None);
        }
        if tabbing || dropdown.accept.matches(press) || press.is_plain("Enter") {
            let current = self.tags.value().to_string();
            if let Some(next) = self.autocomplete.accept(&current) {
                self.tags.set(&next);
                return Some(FormAction::Changed);
            }
            return Some(FormAction::None);
        }
        None
    }

    /// URL to scrape once the debounce window has passed.
    pub fn scrape_due(&mut self, now: Instant) -> Option<String> {
        if !self.scrape.fire(now) {
            return None;
        }
        let url = self.url.value().trim().to_string();
        bookmark::is_valid_url(&url).then_some(url)
    }

    /// Fills fields the user left empty from scraped metadata.
    pub fn apply_scrape(&mut self, scraped: &ScrapeResult) {
        let title = scraped.title.trim();
        if self.title.is_empty() && !title.is_empty() && title != UNTITLED {
            self.title.set(title);
        }
        if self.desc.is_empty() && !scraped.desc.trim().is_empty() {
            self.desc.set(scraped.desc.trim());
        }
        if self.tags.is_empty() && !scraped.tags.is_empty() {
            self.tags.set(&bookmark::format_tags(&scraped.tags));
        }
        if self.favicon_url.is_empty() {
            self.favicon_url = scraped.favicon_url.clone();
        }
    }

    /// Strips tracking parameters from the URL field. Returns the names that
    /// were removed.
    pub fn clean_url(&mut self) -> Vec<String> {
        match bookmark::clean_url(self.url.value()) {
            Ok(cleaned) if !cleaned.removed.is_empty() => {
                self.url.set(&cleaned.url);
                cleaned.removed
            }
            _ => Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let url = self.url.value().trim();
        if url.is_empty() {
            return Err("URL is required".into());
        }
        if !bookmark::is_valid_url(url) {
            return Err(format!("invalid URL: {url}"));
        }
        Ok(())
    }

    pub fn to_new(&self) -> NewBookmark {
        NewBookmark {
            url: self.url.value().trim().to_string(),
            title: self.title.value().trim().to_string(),
            desc: self.desc.value().trim().to_string(),
            favicon_url: self.favicon_url.clone(),
            tags: bookmark::parse_tags(self.tags.value()),
        }
    }

    /// The edited bookmark, keeping every field the form does not show.
    pub fn to_updated(&self) -> Option<Bookmark> {
        let mut updated = self.original.clone()?;
        updated.url = self.url.value().trim().to_string();
        updated.title = self.title.value().trim().to_string();
        updated.desc = self.desc.value().trim().to_string();
        updated.tags = bookmark::parse_tags(self.tags.value());
        Some(updated)
    }

    pub fn begin_submit(&mut self) {
        self.autocomplete.hide();
        self.status = FormStatus::Submitting;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = FormStatus::Failed(message.into());
    }

    pub fn saved(&mut self, message: impl Into<String>) {
        self.status = FormStatus::Saved(message.into());
    }
}
