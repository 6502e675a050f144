use std::time::Instant;

use crate::bookmark::Bookmark;

/// Per-card visual state driven by the two-phase delete and its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Confirming { deadline: Instant },
    Deleting,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub bookmark: Bookmark,
    pub state: CardState,
}

impl Card {
    pub fn new(bookmark: Bookmark) -> Self {
        Self {
            bookmark,
            state: CardState::Idle,
        }
    }

    pub fn id(&self) -> u64 {
        self.bookmark.id
    }

    pub fn is_confirming(&self) -> bool {
        matches!(self.state, CardState::Confirming { .. })
    }
}

/// The cards currently on screen. Indices stay stable until the next
/// `replace`, which is the only way the collection changes shape.
#[derive(Debug, Clone, Default)]
pub struct CardCollection {
    cards: Vec<Card>,
}

impl CardCollection {
    pub fn new(bookmarks: Vec<Bookmark>) -> Self {
        Self {
            cards: bookmarks.into_iter().map(Card::new).collect(),
        }
    }

    pub fn replace(&mut self, bookmarks: Vec<Bookmark>) {
        self.cards = bookmarks.into_iter().map(Card::new).collect();
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Card> {
        self.cards.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Card> {
        self.cards.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    pub fn position(&self, id: u64) -> Option<usize> {
        self.cards.iter().position(|card| card.id() == id)
    }

    pub fn state(&self, index: usize) -> Option<CardState> {
        self.cards.get(index).map(|card| card.state)
    }

    pub fn set_state(&mut self, index: usize, state: CardState) {
        if let Some(card) = self.cards.get_mut(index) {
            card.state = state;
        }
    }

    /// Updates the bookmark behind a card in place (favorite toggles, edits).
    pub fn update_bookmark(&mut self, bookmark: Bookmark) -> bool {
        match self.cards.iter_mut().find(|card| card.id() == bookmark.id) {
            Some(card) => {
                card.bookmark = bookmark;
                true
            }
            None => false,
        }
    }

    /// Reverts confirmations whose deadline has passed. Returns how many
    /// cards changed.
    pub fn expire_confirmations(&mut self, now: Instant) -> usize {
        let mut changed = 0;
        for card in &mut self.cards {
            if let CardState::Confirming { deadline } = card.state {
                if now >= deadline {
                    card.state = CardState::Idle;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn clear_confirmations(&mut self) {
        for card in &mut self.cards {
            if card.is_confirming() {
                card.state = CardState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bookmark(id: u64) -> Bookmark {
        Bookmark {
            id,
            url: format!("https://example.com/{id}"),
            ..Bookmark::default()
        }
    }

    #[test]
    fn expired_confirmations_revert_to_idle() {
        let now = Instant::now();
        let mut cards = CardCollection::new(vec![bookmark(1), bookmark(2)]);
        cards.set_state(
            0,
            CardState::Confirming {
                deadline: now + Duration::from_secs(3),
            },
        );
        cards.set_state(1, CardState::Deleting);
        assert_eq!(cards.expire_confirmations(now + Duration::from_secs(1)), 0);
        assert_eq!(cards.expire_confirmations(now + Duration::from_secs(3)), 1);
        assert_eq!(cards.state(0), Some(CardState::Idle));
        assert_eq!(cards.state(1), Some(CardState::Deleting));
    }

    #[test]
    fn update_bookmark_matches_by_id() {
        let mut cards = CardCollection::new(vec![bookmark(4), bookmark(9)]);
        let mut changed = bookmark(9);
        changed.favorite = true;
        assert!(cards.update_bookmark(changed));
        assert!(cards.get(1).unwrap().bookmark.favorite);
        assert!(!cards.update_bookmark(bookmark(77)));
        assert_eq!(cards.position(4), Some(0));
    }
}
