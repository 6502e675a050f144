//! LIFO stack of the secondary surfaces. Only the top entry is open and
//! receives input.

use std::collections::HashMap;

use tracing::debug;

use crate::keys::KeyPress;

/// One logical dialog. Parameterized surfaces are distinct per bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Help,
    Settings,
    Detail(u64),
    Edit(u64),
    Notes(u64),
    NewBookmark,
    QrCode(u64),
    Repositories,
    NewRepository,
}

impl Surface {
    pub fn title(&self) -> String {
        match self {
            Surface::Help => "Keyboard shortcuts".to_string(),
            Surface::Settings => "Settings".to_string(),
            Surface::Detail(id) => format!("Bookmark #{id}"),
            Surface::Edit(id) => format!("Edit bookmark #{id}"),
            Surface::Notes(id) => format!("Notes for #{id}"),
            Surface::NewBookmark => "New bookmark".to_string(),
            Surface::QrCode(id) => format!("QR code #{id}"),
            Surface::Repositories => "Repositories".to_string(),
            Surface::NewRepository => "New repository".to_string(),
        }
    }

    /// Surfaces that host text inputs.
    pub fn has_inputs(&self) -> bool {
        matches!(
            self,
            Surface::Edit(_) | Surface::Notes(_) | Surface::NewBookmark | Surface::NewRepository
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalState {
    Closed,
    Open,
}

/// Ways a surface can be dismissed besides the global escape key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    Backdrop,
    CloseButton,
}

pub const DEFAULT_TRIGGERS: [CloseTrigger; 2] = [CloseTrigger::Backdrop, CloseTrigger::CloseButton];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModalHandle {
    surface: Surface,
}

impl ModalHandle {
    pub fn surface(&self) -> Surface {
        self.surface
    }
}

#[derive(Debug)]
struct Entry {
    handle: ModalHandle,
    state: ModalState,
    triggers: Vec<CloseTrigger>,
    closers_bound: bool,
    scroll: u16,
}

/// Result of routing an escape or close key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeOutcome {
    /// The key is neither escape nor close for the current context.
    NotHandled,
    /// A focused text input lost focus; nothing was closed.
    Blurred,
    Closed(Surface),
    /// Escape with an empty stack and no focused input.
    Ignored,
}

#[derive(Debug, Default)]
pub struct ModalStack {
    entries: HashMap<Surface, Entry>,
    stack: Vec<Surface>,
    scroll_locked: bool,
}

impl ModalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, surface: Surface, triggers: &[CloseTrigger]) -> ModalHandle {
        if let Some(handle) = self.entries.get(&surface).map(|entry| entry.handle) {
            self.cleanup(surface);
            return handle;
        }

        let handle = ModalHandle { surface };
        let mut entry = Entry {
            handle,
            state: ModalState::Closed,
            triggers: Vec::new(),
            closers_bound: false,
            scroll: 0,
        };
        bind_close_triggers(&mut entry, triggers);
        self.entries.insert(surface, entry);
        debug!(?surface, "modal registered");
        handle
    }

    pub fn open(&mut self, surface: Surface) {
        if !self.entries.contains_key(&surface) {
            self.register(surface, &DEFAULT_TRIGGERS);
        }

        if let Some(top) = self.current() {
            if top != surface {
                self.set_state(top, ModalState::Closed);
            }
        }

        if !self.stack.contains(&surface) {
            self.stack.push(surface);
        }

        if let Some(entry) = self.entries.get_mut(&surface) {
            entry.state = ModalState::Open;
            entry.scroll = 0;
        }
        self.scroll_locked = true;
        debug!(?surface, depth = self.stack.len(), "modal opened");
    }

    /// Closes a visible surface and reveals the new top. Returns whether
    /// anything changed.
    pub fn close(&mut self, surface: Surface) -> bool {
        if !self.is_open(surface) {
            return false;
        }
        self.set_state(surface, ModalState::Closed);
        self.stack.retain(|entry| *entry != surface);

        if let Some(top) = self.current() {
            self.set_state(top, ModalState::Open);
        }
        self.scroll_locked = !self.stack.is_empty();
        debug!(?surface, depth = self.stack.len(), "modal closed");
        true
    }

    pub fn toggle(&mut self, surface: Surface) {
        if self.is_open(surface) {
            self.close(surface);
        } else {
            self.open(surface);
        }
    }

    pub fn is_open(&self, surface: Surface) -> bool {
        self.entries
            .get(&surface)
            .map(|entry| entry.state == ModalState::Open)
            .unwrap_or(false)
    }

    pub fn state(&self, surface: Surface) -> Option<ModalState> {
        self.entries.get(&surface).map(|entry| entry.state)
    }

    pub fn current(&self) -> Option<Surface> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.stack
    }

    pub fn is_scroll_locked(&self) -> bool {
        self.scroll_locked
    }

    /// Number of close triggers bound for `surface`.
    pub fn bound_triggers(&self, surface: Surface) -> usize {
        self.entries
            .get(&surface)
            .map(|entry| entry.triggers.len())
            .unwrap_or(0)
    }

    /// Fires a close trigger (backdrop click, close button, ...) on a surface.
    pub fn trigger(&mut self, surface: Surface, trigger: CloseTrigger) -> bool {
        let bound = self
            .entries
            .get(&surface)
            .map(|entry| entry.triggers.contains(&trigger))
            .unwrap_or(false);
        bound && self.close(surface)
    }

    /// Routes one escape/close keypress. Escape blurs a focused input before
    /// it closes anything; the close key is ordinary text while an input has
    /// focus.
    pub fn route_escape(
        &mut self,
        key: &KeyPress,
        escape_key: &str,
        close_key: &str,
        input_focused: bool,
    ) -> EscapeOutcome {
        if key.ctrl || key.alt {
            return EscapeOutcome::NotHandled;
        }
        let is_escape = key.is(escape_key);
        let is_close = key.is(close_key);
        if !is_escape && !is_close {
            return EscapeOutcome::NotHandled;
        }
        if input_focused {
            return if is_escape {
                EscapeOutcome::Blurred
            } else {
                EscapeOutcome::NotHandled
            };
        }
        match self.current() {
            Some(top) => {
                self.close(top);
                EscapeOutcome::Closed(top)
            }
            None if is_escape => EscapeOutcome::Ignored,
            None => EscapeOutcome::NotHandled,
        }
    }

    /// Scrolls the body of the top surface.
    pub fn scroll_by(&mut self, delta: i32) {
        let Some(top) = self.current() else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(&top) {
            let next = (entry.scroll as i32 + delta).clamp(0, u16::MAX as i32);
            entry.scroll = next as u16;
        }
    }

    pub fn scroll_offset(&self, surface: Surface) -> u16 {
        self.entries
            .get(&surface)
            .map(|entry| entry.scroll)
            .unwrap_or(0)
    }

    /// Closes every surface, top first.
    pub fn close_all(&mut self) {
        while let Some(top) = self.current() {
            if !self.close(top) {
                self.stack.pop();
            }
        }
        self.scroll_locked = false;
    }

    fn cleanup(&mut self, surface: Surface) {
        self.stack.retain(|entry| *entry != surface);
        self.set_state(surface, ModalState::Closed);
        self.scroll_locked = !self.stack.is_empty();
    }

    fn set_state(&mut self, surface: Surface, state: ModalState) {
        if let Some(entry) = self.entries.get_mut(&surface) {
            entry.state = state;
        }
    }
}

fn bind_close_triggers(entry: &mut Entry, triggers: &[CloseTrigger]) {
    if entry.closers_bound {
        return;
    }
    entry.closers_bound = true;
    for trigger in triggers {
        if !entry.triggers.contains(trigger) {
            entry.triggers.push(*trigger);
        }
    }
}
