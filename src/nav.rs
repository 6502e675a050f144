//! Vim-style keyboard dispatcher over the visible bookmark cards. Side
//! effects go through [`NavDelegate`].

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::bookmark::Bookmark;
use crate::cards::{CardCollection, CardState};
use crate::config::Keybinds;
use crate::keys::KeyPress;
use crate::modal::ModalStack;

/// Window in which the second key of a two-key chord must arrive.
pub const CHORD_WINDOW: Duration = Duration::from_millis(300);
/// How long a card stays armed for deletion.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(3);
/// Lines scrolled per down/up press while a surface is open.
pub const MODAL_SCROLL_STEP: i32 = 3;

/// Collaborator receiving the commands the navigator resolves.
pub trait NavDelegate {
    fn open_detail(&mut self, bookmark: &Bookmark);
    fn open_in_tab(&mut self, bookmark: &Bookmark);
    fn paste_new(&mut self);
    fn new_bookmark(&mut self);
    fn edit(&mut self, bookmark: &Bookmark);
    fn toggle_favorite(&mut self, bookmark: &Bookmark);
    fn yank_url(&mut self, bookmark: &Bookmark);
    fn delete(&mut self, bookmark: &Bookmark);
    fn open_qr(&mut self, bookmark: &Bookmark);
    fn toggle_help(&mut self);
    fn open_settings(&mut self);
    fn reload(&mut self);
    fn toggle_theme(&mut self);
    fn toggle_sort_menu(&mut self);
    fn next_page(&mut self);
    fn prev_page(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Insert mode; the key belongs to the focused input.
    Suppressed,
    ModalScrolled,
    /// A surface is open and the key has no meaning there.
    ModalIgnored,
    Handled,
    /// Unbound key, remembered as the first half of a chord.
    ChordPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingChord {
    key: String,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Navigator {
    cards: CardCollection,
    cursor: Option<usize>,
    multi_select: bool,
    selection: BTreeSet<usize>,
    insert_mode: bool,
    pending: Option<PendingChord>,
    keybinds: Keybinds,
}

impl Navigator {
    pub fn new(keybinds: Keybinds) -> Self {
        Self {
            cards: CardCollection::default(),
            cursor: None,
            multi_select: false,
            selection: BTreeSet::new(),
            insert_mode: false,
            pending: None,
            keybinds,
        }
    }

    pub fn with_cards(keybinds: Keybinds, bookmarks: Vec<Bookmark>) -> Self {
        let mut nav = Self::new(keybinds);
        nav.replace_cards(bookmarks);
        nav
    }

    pub fn keybinds(&self) -> &Keybinds {
        &self.keybinds
    }

    pub fn set_keybinds(&mut self, keybinds: Keybinds) {
        self.keybinds = keybinds;
    }

    pub fn cards(&self) -> &CardCollection {
        &self.cards
    }

    pub fn cards_mut(&mut self) -> &mut CardCollection {
        &mut self.cards
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn selection(&self) -> &BTreeSet<usize> {
        &self.selection
    }

    pub fn is_multi_select(&self) -> bool {
        self.multi_select
    }

    pub fn is_insert_mode(&self) -> bool {
        self.insert_mode
    }

    pub fn current(&self) -> Option<&Bookmark> {
        self.cursor
            .and_then(|index| self.cards.get(index))
            .map(|card| &card.bookmark)
    }

    /// A text input gained focus.
    pub fn on_focus(&mut self) {
        self.insert_mode = true;
        self.pending = None;
    }

    /// The focused text input lost focus.
    pub fn on_blur(&mut self) {
        self.insert_mode = false;
    }

    /// The visible collection changed (page load, delete, create). The
    /// cursor and selection are clamped to the new length.
    pub fn replace_cards(&mut self, bookmarks: Vec<Bookmark>) {
        self.cards.replace(bookmarks);
        let len = self.cards.len();
        self.cursor = match (self.cursor, len) {
            (_, 0) => None,
            (Some(index), len) => Some(index.min(len - 1)),
            (None, _) => None,
        };
        self.selection.retain(|index| *index < len);
        debug!(cards = len, cursor = ?self.cursor, "card collection replaced");
    }

    /// Moves the cursor to `index` (mouse selection), clamped.
    pub fn select(&mut self, index: usize) {
        if self.cards.is_empty() {
            self.cursor = None;
        } else {
            self.cursor = Some(index.min(self.cards.len() - 1));
        }
    }

    /// Moves the cursor by `delta`, clamped to `[0, N-1]`. From "no
    /// selection" any move lands on the first card.
    pub fn move_by(&mut self, delta: i64) {
        let len = self.cards.len();
        if len == 0 {
            self.cursor = None;
            return;
        }
        let current = self.cursor.map(|index| index as i64).unwrap_or(-1);
        let next = (current + delta).clamp(0, len as i64 - 1);
        self.cursor = Some(next as usize);
    }

    /// Reverts expired delete confirmations. Returns whether anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let Some(pending) = &self.pending {
            if now >= pending.deadline {
                self.pending = None;
            }
        }
        self.cards.expire_confirmations(now) > 0
    }

    pub fn handle_key(
        &mut self,
        press: &KeyPress,
        now: Instant,
        modals: &mut ModalStack,
        delegate: &mut dyn NavDelegate,
    ) -> Dispatch {
        // A confirmation past its deadline counts as idle even before the next tick.
        self.cards.expire_confirmations(now);
        if self.insert_mode {
            return Dispatch::Suppressed;
        }

        if modals.current().is_some() {
            return if self.is_down(press) {
                modals.scroll_by(MODAL_SCROLL_STEP);
                Dispatch::ModalScrolled
            } else if self.is_up(press) {
                modals.scroll_by(-MODAL_SCROLL_STEP);
                Dispatch::ModalScrolled
            } else {
                Dispatch::ModalIgnored
            };
        }

        trace!(key = %press.label(), "navigator key");
        let pending = self.pending.take();

        if self.completes_chord(press, pending.as_ref(), now) {
            if !self.cards.is_empty() {
                self.cursor = Some(0);
            }
            return Dispatch::Handled;
        }

        if let Some(dispatch) = self.resolve_command(press, now, delegate) {
            return dispatch;
        }

        if !self.is_down(press) && !self.is_up(press) {
            if press.ctrl || press.alt {
                return Dispatch::Handled;
            }
            self.pending = Some(PendingChord {
                key: press.key.clone(),
                deadline: now + CHORD_WINDOW,
            });
            return Dispatch::ChordPending;
        }

        let direction = if self.is_down(press) { 1 } else { -1 };
        self.move_by(direction);
        Dispatch::Handled
    }

    fn completes_chord(&self, press: &KeyPress, pending: Option<&PendingChord>, now: Instant) -> bool {
        let top = &self.keybinds.navigation.top;
        if !top.done || press.ctrl || press.alt {
            return false;
        }
        let mut chars = top.key.chars();
        let (Some(first), Some(second), None) = (chars.next(), chars.next(), chars.next()) else {
            return false;
        };
        let Some(pending) = pending else {
            return false;
        };
        press.key == second.to_string() && pending.key == first.to_string() && now < pending.deadline
    }

    fn resolve_command(
        &mut self,
        press: &KeyPress,
        now: Instant,
        delegate: &mut dyn NavDelegate,
    ) -> Option<Dispatch> {
        let nav = &self.keybinds.navigation;
        let actions = &self.keybinds.actions;
        let utility = &self.keybinds.utility;

        if nav.middle.matches_shifted(press) {
            if !self.cards.is_empty() {
                self.cursor = Some(self.cards.len() / 2);
            }
            return Some(Dispatch::Handled);
        }
        if nav.bottom.matches_shifted(press) {
            if !self.cards.is_empty() {
                self.cursor = Some(self.cards.len() - 1);
            }
            return Some(Dispatch::Handled);
        }
        if nav.page_next.matches(press) {
            delegate.next_page();
            return Some(Dispatch::Handled);
        }
        if nav.page_prev.matches(press) {
            delegate.prev_page();
            return Some(Dispatch::Handled);
        }

        if actions.enter.matches(press) {
            if let Some(bookmark) = self.current() {
                delegate.open_detail(bookmark);
            }
            return Some(Dispatch::Handled);
        }
        if actions.open_tab.matches_shifted(press) {
            if let Some(bookmark) = self.current() {
                delegate.open_in_tab(bookmark);
            }
            return Some(Dispatch::Handled);
        }
        if actions.paste.matches_shifted(press) {
            delegate.paste_new();
            return Some(Dispatch::Handled);
        }
        if actions.new_bookmark.matches(press) {
            delegate.new_bookmark();
            return Some(Dispatch::Handled);
        }
        if actions.edit.matches(press) {
            if let Some(bookmark) = self.current() {
                delegate.edit(bookmark);
            }
            return Some(Dispatch::Handled);
        }
        if actions.favorite.matches(press) {
            self.favorite(delegate);
            return Some(Dispatch::Handled);
        }
        if actions.yank.matches_shifted(press) {
            if let Some(bookmark) = self.current() {
                delegate.yank_url(bookmark);
            }
            return Some(Dispatch::Handled);
        }
        if actions.delete.matches_shifted(press) {
            self.delete(now, delegate);
            return Some(Dispatch::Handled);
        }
        let toggles_selection = actions.selection.matches(press)
            || (!press.ctrl && !press.alt && press.key.eq_ignore_ascii_case("v"));
        if toggles_selection {
            self.toggle_multi_select();
            return Some(Dispatch::Handled);
        }
        if self.multi_select && press.is_plain(" ") {
            if let Some(index) = self.cursor {
                self.toggle_membership(index);
            }
            return Some(Dispatch::Handled);
        }

        if actions.qrcode.matches(press) {
            if let Some(bookmark) = self.current() {
                delegate.open_qr(bookmark);
            }
            return Some(Dispatch::Handled);
        }
        if utility.help.matches(press) {
            delegate.toggle_help();
            return Some(Dispatch::Handled);
        }
        if utility.settings.matches(press) {
            delegate.open_settings();
            return Some(Dispatch::Handled);
        }
        if utility.reload.matches_shifted(press) {
            delegate.reload();
            return Some(Dispatch::Handled);
        }
        if utility.theme_toggle.matches(press) {
            delegate.toggle_theme();
            return Some(Dispatch::Handled);
        }
        if utility.sort.matches(press) {
            delegate.toggle_sort_menu();
            return Some(Dispatch::Handled);
        }
        if utility.escape.matches(press) {
            if self.multi_select {
                self.toggle_multi_select();
            }
            self.cards.clear_confirmations();
            return Some(Dispatch::Handled);
        }

        None
    }

    fn is_down(&self, press: &KeyPress) -> bool {
        self.keybinds.navigation.down.matches(press) || press.is_plain("ArrowDown")
    }

    fn is_up(&self, press: &KeyPress) -> bool {
        self.keybinds.navigation.up.matches(press) || press.is_plain("ArrowUp")
    }

    pub fn toggle_multi_select(&mut self) {
        self.multi_select = !self.multi_select;
        if self.multi_select {
            debug!("entered multi-selection");
            if let Some(index) = self.cursor {
                self.toggle_membership(index);
            }
        } else {
            debug!("left multi-selection");
            for index in std::mem::take(&mut self.selection) {
                if self.cards.get(index).map(|c| c.is_confirming()).unwrap_or(false) {
                    self.cards.set_state(index, CardState::Idle);
                }
            }
        }
    }

    pub fn toggle_membership(&mut self, index: usize) {
        if index >= self.cards.len() {
            return;
        }
        if !self.selection.remove(&index) {
            self.selection.insert(index);
        }
    }

    fn favorite(&mut self, delegate: &mut dyn NavDelegate) {
        if self.multi_select && !self.selection.is_empty() {
            for index in &self.selection {
                if let Some(card) = self.cards.get(*index) {
                    delegate.toggle_favorite(&card.bookmark);
                }
            }
            return;
        }
        if let Some(bookmark) = self.current() {
            delegate.toggle_favorite(bookmark);
        }
    }

    fn delete(&mut self, now: Instant, delegate: &mut dyn NavDelegate) {
        if self.multi_select && !self.selection.is_empty() {
            self.delete_selected(now, delegate);
        } else if let Some(index) = self.cursor {
            self.delete_single(index, now, delegate);
        }
    }

    fn delete_single(&mut self, index: usize, now: Instant, delegate: &mut dyn NavDelegate) {
        let Some(card) = self.cards.get_mut(index) else {
            return;
        };
        match card.state {
            CardState::Confirming { .. } => {
                card.state = CardState::Deleting;
                debug!(id = card.id(), "deleting bookmark");
                delegate.delete(&card.bookmark);
            }
            CardState::Idle => {
                card.state = CardState::Confirming {
                    deadline: now + CONFIRM_WINDOW,
                };
            }
            CardState::Deleting | CardState::Deleted => {}
        }
    }

    fn delete_selected(&mut self, now: Instant, delegate: &mut dyn NavDelegate) {
        let confirmed: Vec<usize> = self
            .selection
            .iter()
            .copied()
            .filter(|index| {
                self.cards
                    .get(*index)
                    .map(|card| card.is_confirming())
                    .unwrap_or(false)
            })
            .collect();

        if confirmed.is_empty() {
            for index in &self.selection {
                if let Some(card) = self.cards.get_mut(*index) {
                    if card.state == CardState::Idle {
                        card.state = CardState::Confirming {
                            deadline: now + CONFIRM_WINDOW,
                        };
                    }
                }
            }
            return;
        }

        for index in &confirmed {
            if let Some(card) = self.cards.get_mut(*index) {
                card.state = CardState::Deleting;
                delegate.delete(&card.bookmark);
            }
            self.selection.remove(index);
        }
        debug!(count = confirmed.len(), "bulk delete dispatched");
    }

    /// Marks the card for `id` as deleted once the server confirmed it.
    pub fn mark_deleted(&mut self, id: u64) {
        if let Some(index) = self.cards.position(id) {
            self.cards.set_state(index, CardState::Deleted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modal::Surface;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl NavDelegate for Recorder {
        fn open_detail(&mut self, b: &Bookmark) {
            self.calls.push(format!("detail:{}", b.id));
        }
        fn open_in_tab(&mut self, b: &Bookmark) {
            self.calls.push(format!("tab:{}", b.id));
        }
        fn paste_new(&mut self) {
            self.calls.push("paste".into());
        }
        fn new_bookmark(&mut self) {
            self.calls.push("new".into());
        }
        fn edit(&mut self, b: &Bookmark) {
            self.calls.push(format!("edit:{}", b.id));
        }
        fn toggle_favorite(&mut self, b: &Bookmark) {
            self.calls.push(format!("fav:{}", b.id));
        }
        fn yank_url(&mut self, b: &Bookmark) {
            self.calls.push(format!("yank:{}", b.id));
        }
        fn delete(&mut self, b: &Bookmark) {
            self.calls.push(format!("delete:{}", b.id));
        }
        fn open_qr(&mut self, b: &Bookmark) {
            self.calls.push(format!("qr:{}", b.id));
        }
        fn toggle_help(&mut self) {
            self.calls.push("help".into());
        }
        fn open_settings(&mut self) {
            self.calls.push("settings".into());
        }
        fn reload(&mut self) {
            self.calls.push("reload".into());
        }
        fn toggle_theme(&mut self) {
            self.calls.push("theme".into());
        }
        fn toggle_sort_menu(&mut self) {
            self.calls.push("sort".into());
        }
        fn next_page(&mut self) {
            self.calls.push("next".into());
        }
        fn prev_page(&mut self) {
            self.calls.push("prev".into());
        }
    }

    fn bookmarks(n: u64) -> Vec<Bookmark> {
        (1..=n)
            .map(|id| Bookmark {
                id,
                url: format!("https://example.com/{id}"),
                ..Bookmark::default()
            })
            .collect()
    }

    struct Harness {
        nav: Navigator,
        modals: ModalStack,
        rec: Recorder,
        now: Instant,
    }

    impl Harness {
        fn new(n: u64) -> Self {
            Self {
                nav: Navigator::with_cards(Keybinds::default(), bookmarks(n)),
                modals: ModalStack::new(),
                rec: Recorder::default(),
                now: Instant::now(),
            }
        }

        fn press(&mut self, key: KeyPress) -> Dispatch {
            self.nav
                .handle_key(&key, self.now, &mut self.modals, &mut self.rec)
        }

        fn ch(&mut self, c: char) -> Dispatch {
            self.press(KeyPress::char(c))
        }

        fn advance(&mut self, millis: u64) {
            self.now += Duration::from_millis(millis);
        }
    }

    #[test]
    fn cursor_starts_unselected_and_clamps() {
        let mut h = Harness::new(3);
        assert_eq!(h.nav.cursor(), None);
        h.ch('k');
        assert_eq!(h.nav.cursor(), Some(0));
        for _ in 0..5 {
            h.ch('j');
        }
        assert_eq!(h.nav.cursor(), Some(2));
        h.press(KeyPress::named("ArrowUp"));
        assert_eq!(h.nav.cursor(), Some(1));
    }

    #[test]
    fn empty_collection_keeps_cursor_unset() {
        let mut h = Harness::new(0);
        h.ch('j');
        h.ch('G');
        h.ch('M');
        assert_eq!(h.nav.cursor(), None);
    }

    #[test]
    fn gg_within_window_goes_to_top() {
        let mut h = Harness::new(5);
        h.ch('G');
        assert_eq!(h.ch('g'), Dispatch::ChordPending);
        h.advance(200);
        assert_eq!(h.ch('g'), Dispatch::Handled);
        assert_eq!(h.nav.cursor(), Some(0));
    }

    #[test]
    fn gg_too_slow_only_rearms() {
        let mut h = Harness::new(5);
        h.ch('G');
        h.ch('g');
        h.advance(400);
        assert_eq!(h.ch('g'), Dispatch::ChordPending);
        assert_eq!(h.nav.cursor(), Some(4));
    }

    #[test]
    fn other_keys_cancel_a_pending_chord() {
        let mut h = Harness::new(5);
        h.ch('G');
        h.ch('g');
        h.ch('k');
        h.ch('g');
        assert_eq!(h.nav.cursor(), Some(3));
    }

    #[test]
    fn middle_and_bottom_need_shift() {
        let mut h = Harness::new(5);
        h.ch('M');
        assert_eq!(h.nav.cursor(), Some(2));
        h.ch('G');
        assert_eq!(h.nav.cursor(), Some(4));
    }

    #[test]
    fn actions_reach_delegate_with_current_card() {
        let mut h = Harness::new(3);
        h.press(KeyPress::named("Enter"));
        h.ch('j');
        h.press(KeyPress::named("Enter"));
        h.ch('e');
        h.ch('f');
        h.ch('Y');
        h.ch('O');
        h.ch('c');
        h.ch('P');
        h.ch('a');
        h.ch('n');
        h.ch('p');
        h.ch('?');
        h.ch('S');
        h.ch('R');
        h.ch('T');
        h.ch('s');
        assert_eq!(
            h.rec.calls,
            vec![
                "detail:1", "edit:1", "fav:1", "yank:1", "tab:1", "qr:1", "paste", "new", "next",
                "prev", "help", "settings", "reload", "theme", "sort"
            ]
        );
    }

    #[test]
    fn insert_mode_suppresses_everything() {
        let mut h = Harness::new(3);
        h.nav.on_focus();
        assert_eq!(h.ch('j'), Dispatch::Suppressed);
        assert_eq!(h.ch('D'), Dispatch::Suppressed);
        assert_eq!(h.nav.cursor(), None);
        h.nav.on_blur();
        h.ch('j');
        assert_eq!(h.nav.cursor(), Some(0));
    }

    #[test]
    fn open_modal_turns_down_up_into_scroll() {
        let mut h = Harness::new(3);
        h.modals.open(Surface::Help);
        assert_eq!(h.ch('j'), Dispatch::ModalScrolled);
        assert_eq!(h.ch('j'), Dispatch::ModalScrolled);
        assert_eq!(h.modals.scroll_offset(Surface::Help), 2 * MODAL_SCROLL_STEP as u16);
        assert_eq!(h.ch('D'), Dispatch::ModalIgnored);
        assert_eq!(h.nav.cursor(), None);
        assert!(h.rec.calls.is_empty());
    }

    #[test]
    fn single_delete_is_two_phase() {
        let mut h = Harness::new(3);
        h.ch('j');
        h.ch('D');
        assert!(h.nav.cards().get(0).unwrap().is_confirming());
        assert!(h.rec.calls.is_empty());
        h.advance(1000);
        h.ch('D');
        assert_eq!(h.nav.cards().state(0), Some(CardState::Deleting));
        assert_eq!(h.rec.calls, vec!["delete:1"]);
        h.ch('D');
        assert_eq!(h.rec.calls.len(), 1);
    }

    #[test]
    fn confirmation_expires_after_window() {
        let mut h = Harness::new(2);
        h.ch('j');
        h.ch('D');
        assert!(!h.nav.tick(h.now + Duration::from_millis(2999)));
        assert!(h.nav.tick(h.now + CONFIRM_WINDOW));
        assert_eq!(h.nav.cards().state(0), Some(CardState::Idle));
        h.advance(3000);
        h.ch('D');
        assert!(h.rec.calls.is_empty());
    }

    #[test]
    fn late_second_press_rearms_without_a_tick() {
        let mut h = Harness::new(2);
        h.ch('j');
        h.ch('D');
        h.advance(3100);
        h.ch('D');
        assert!(h.rec.calls.is_empty());
        assert!(h.nav.cards().get(0).unwrap().is_confirming());
        h.advance(500);
        h.ch('D');
        assert_eq!(h.rec.calls, vec!["delete:1"]);
    }

    #[test]
    fn late_bulk_confirmation_rearms_without_a_tick() {
        let mut h = Harness::new(3);
        h.ch('j');
        h.ch('v');
        h.ch('j');
        h.ch(' ');
        h.ch('D');
        h.advance(3100);
        h.ch('D');
        assert!(h.rec.calls.is_empty());
        assert!(h.nav.cards().get(0).unwrap().is_confirming());
        assert!(h.nav.cards().get(1).unwrap().is_confirming());
    }

    #[test]
    fn bulk_delete_arms_then_deletes_confirmed() {
        let mut h = Harness::new(4);
        h.ch('j');
        h.ch('v');
        h.ch('j');
        h.ch('j');
        h.ch(' ');
        assert_eq!(h.nav.selection().iter().copied().collect::<Vec<_>>(), vec![0, 2]);

        h.ch('D');
        assert!(h.nav.cards().get(0).unwrap().is_confirming());
        assert!(h.nav.cards().get(2).unwrap().is_confirming());
        assert!(h.rec.calls.is_empty());

        h.ch('D');
        assert_eq!(h.rec.calls, vec!["delete:1", "delete:3"]);
        assert!(h.nav.selection().is_empty());
        assert_eq!(h.nav.cards().state(1), Some(CardState::Idle));
    }

    #[test]
    fn bulk_favorite_hits_every_selected_card() {
        let mut h = Harness::new(3);
        h.ch('v');
        h.ch('j');
        h.ch(' ');
        h.ch('j');
        h.ch(' ');
        h.ch('f');
        assert_eq!(h.rec.calls, vec!["fav:1", "fav:2"]);
    }

    #[test]
    fn escape_leaves_multi_select_and_clears_confirms() {
        let mut h = Harness::new(3);
        h.ch('j');
        h.ch('D');
        h.ch('V');
        assert!(h.nav.is_multi_select());
        h.press(KeyPress::named("Escape"));
        assert!(!h.nav.is_multi_select());
        assert!(h.nav.selection().is_empty());
        assert_eq!(h.nav.cards().state(0), Some(CardState::Idle));
    }

    #[test]
    fn replacing_cards_clamps_cursor_and_selection() {
        let mut h = Harness::new(5);
        h.ch('G');
        h.ch('v');
        h.nav.replace_cards(bookmarks(2));
        assert_eq!(h.nav.cursor(), Some(1));
        assert!(h.nav.selection().is_empty());
        h.nav.replace_cards(Vec::new());
        assert_eq!(h.nav.cursor(), None);
    }

    #[test]
    fn disabled_bindings_fall_through() {
        let mut h = Harness::new(2);
        assert_eq!(h.ch('t'), Dispatch::ChordPending);
        assert!(h.rec.calls.is_empty());
    }
}
