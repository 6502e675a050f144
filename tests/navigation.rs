use std::time::{Duration, Instant};

use gm_tui::bookmark::Bookmark;
use gm_tui::cards::CardState;
use gm_tui::config::Keybinds;
use gm_tui::keys::KeyPress;
use gm_tui::modal::{ModalStack, ModalState, Surface, DEFAULT_TRIGGERS};
use gm_tui::nav::{NavDelegate, Navigator};

#[derive(Default)]
struct Deletes(Vec<u64>);

impl NavDelegate for Deletes {
    fn open_detail(&mut self, _: &Bookmark) {}
    fn open_in_tab(&mut self, _: &Bookmark) {}
    fn paste_new(&mut self) {}
    fn new_bookmark(&mut self) {}
    fn edit(&mut self, _: &Bookmark) {}
    fn toggle_favorite(&mut self, _: &Bookmark) {}
    fn yank_url(&mut self, _: &Bookmark) {}
    fn delete(&mut self, bookmark: &Bookmark) {
        self.0.push(bookmark.id);
    }
    fn open_qr(&mut self, _: &Bookmark) {}
    fn toggle_help(&mut self) {}
    fn open_settings(&mut self) {}
    fn reload(&mut self) {}
    fn toggle_theme(&mut self) {}
    fn toggle_sort_menu(&mut self) {}
    fn next_page(&mut self) {}
    fn prev_page(&mut self) {}
}

fn cards(n: u64) -> Vec<Bookmark> {
    (1..=n)
        .map(|id| Bookmark {
            id,
            url: format!("https://example.com/{id}"),
            title: format!("Bookmark {id}"),
            ..Bookmark::default()
        })
        .collect()
}

struct Session {
    nav: Navigator,
    modals: ModalStack,
    deletes: Deletes,
    now: Instant,
}

impl Session {
    fn new(n: u64) -> Self {
        Self {
            nav: Navigator::with_cards(Keybinds::default(), cards(n)),
            modals: ModalStack::new(),
            deletes: Deletes::default(),
            now: Instant::now(),
        }
    }

    fn keys(&mut self, keys: &str) {
        for ch in keys.chars() {
            self.nav.handle_key(
                &KeyPress::char(ch),
                self.now,
                &mut self.modals,
                &mut self.deletes,
            );
        }
    }

    fn wait(&mut self, millis: u64) {
        self.now += Duration::from_millis(millis);
        self.nav.tick(self.now);
    }

    /// Moves the clock without running the periodic tick.
    fn skip(&mut self, millis: u64) {
        self.now += Duration::from_millis(millis);
    }
}

#[test]
fn five_downs_on_five_cards_stop_at_the_last() {
    let mut s = Session::new(5);
    assert_eq!(s.nav.cursor(), None);
    for expected in [0, 1, 2, 3, 4] {
        s.keys("j");
        assert_eq!(s.nav.cursor(), Some(expected));
    }
    s.keys("jj");
    assert_eq!(s.nav.cursor(), Some(4));
    s.keys("kkkkkkk");
    assert_eq!(s.nav.cursor(), Some(0));
}

#[test]
fn stack_is_lifo_and_closing_reveals_previous_top() {
    let mut modals = ModalStack::new();
    let surfaces = [Surface::Help, Surface::Settings, Surface::Detail(3)];
    for surface in surfaces {
        modals.register(surface, &DEFAULT_TRIGGERS);
        modals.open(surface);
    }
    assert_eq!(modals.current(), Some(Surface::Detail(3)));
    let active: Vec<Surface> = surfaces
        .into_iter()
        .filter(|s| modals.state(*s) == Some(ModalState::Open))
        .collect();
    assert_eq!(active, vec![Surface::Detail(3)]);
    assert!(modals.is_scroll_locked());

    modals.close(Surface::Detail(3));
    assert_eq!(modals.current(), Some(Surface::Settings));
    assert_eq!(modals.state(Surface::Settings), Some(ModalState::Open));

    modals.register(Surface::Help, &DEFAULT_TRIGGERS);
    modals.register(Surface::Help, &DEFAULT_TRIGGERS);
    modals.open(Surface::Help);
    modals.open(Surface::Help);
    assert_eq!(modals.depth(), 2);

    modals.close_all();
    assert_eq!(modals.current(), None);
    assert!(!modals.is_scroll_locked());
}

#[test]
fn gg_chord_depends_on_timing() {
    let mut s = Session::new(5);
    s.keys("jjj");
    s.keys("g");
    s.wait(100);
    s.keys("g");
    assert_eq!(s.nav.cursor(), Some(0));

    s.keys("jj");
    s.keys("g");
    s.wait(400);
    s.keys("g");
    assert_eq!(s.nav.cursor(), Some(2));
}

#[test]
fn single_delete_needs_confirmation_within_window() {
    let mut s = Session::new(3);
    s.keys("jj");
    s.keys("D");
    assert!(matches!(s.nav.cards().state(1), Some(CardState::Confirming { .. })));
    assert!(s.deletes.0.is_empty());

    s.wait(3100);
    assert_eq!(s.nav.cards().state(1), Some(CardState::Idle));
    s.keys("D");
    assert!(s.deletes.0.is_empty());

    s.wait(500);
    s.keys("D");
    assert_eq!(s.deletes.0, vec![2]);
    assert_eq!(s.nav.cards().state(1), Some(CardState::Deleting));
}

#[test]
fn expired_confirmation_does_not_delete_before_the_next_tick() {
    let mut s = Session::new(3);
    s.keys("j");
    s.keys("D");
    s.skip(3100);
    s.keys("D");
    assert!(s.deletes.0.is_empty());
    assert!(s.nav.cards().get(0).unwrap().is_confirming());
}

#[test]
fn bulk_delete_arms_then_deletes_each_selected_card() {
    let mut s = Session::new(5);
    s.keys("j");
    s.keys("V");
    assert!(s.nav.is_multi_select());
    // Entering multi-select already holds the card under the cursor.
    s.nav.toggle_membership(2);
    s.nav.toggle_membership(3);
    assert_eq!(s.nav.selection().len(), 3);
    s.keys("D");
    assert!(s.deletes.0.is_empty());
    for index in [0, 2, 3] {
        assert!(s.nav.cards().get(index).unwrap().is_confirming());
    }

    s.keys("D");
    let mut deleted = s.deletes.0.clone();
    deleted.sort();
    assert_eq!(deleted, vec![1, 3, 4]);
    assert!(s.nav.selection().is_empty());
}

#[test]
fn focused_input_suppresses_navigation() {
    let mut s = Session::new(3);
    s.keys("j");
    s.nav.on_focus();
    s.keys("jjDD");
    s.nav.handle_key(
        &KeyPress::named("Escape"),
        s.now,
        &mut s.modals,
        &mut s.deletes,
    );
    assert_eq!(s.nav.cursor(), Some(0));
    assert!(s.deletes.0.is_empty());
    assert_eq!(s.nav.cards().state(0), Some(CardState::Idle));

    let outcome = s.modals.route_escape(&KeyPress::named("Escape"), "Escape", "q", true);
    assert_eq!(outcome, gm_tui::modal::EscapeOutcome::Blurred);
    s.nav.on_blur();
    s.keys("j");
    assert_eq!(s.nav.cursor(), Some(1));
}
