use serde::Serialize;

use crate::player::{Player, PlayerId};

pub const LEADERBOARD_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub username: String,
    pub highscore: i32,
}

impl From<&Player> for LeaderboardEntry {
    fn from(player: &Player) -> Self {
        Self {
            player_id: player.id,
            username: player.username.clone(),
            highscore: player.highscore,
        }
    }
}

/// Top highscores, best first.
///
/// A newcomer replaces the first slot that is empty or strictly lower and the
/// previous occupant drops off the board entirely rather than shifting down.
#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    slots: [Option<LeaderboardEntry>; LEADERBOARD_SIZE],
}

fn score_of(slot: &Option<LeaderboardEntry>) -> Option<i32> {
    slot.as_ref().map(|e| e.highscore)
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an entry. Returns whether the board changed.
    pub fn consider(&mut self, entry: LeaderboardEntry) -> bool {
        let existing = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.player_id == entry.player_id));
        if let Some(idx) = existing {
            if self.slots[idx].as_ref() == Some(&entry) {
                return false;
            }
            self.slots[idx] = Some(entry);
            self.resort();
            return true;
        }

        for slot in self.slots.iter_mut() {
            let replace = match slot {
                None => true,
                Some(current) => current.highscore < entry.highscore,
            };
            if replace {
                *slot = Some(entry);
                return true;
            }
        }
        false
    }

    /// Fixed adjacent-swap passes; a swap needs a strictly higher score, so
    /// ties keep their order.
    fn resort(&mut self) {
        for _ in 0..LEADERBOARD_SIZE - 1 {
            for i in 0..LEADERBOARD_SIZE - 1 {
                if score_of(&self.slots[i + 1]) > score_of(&self.slots[i]) {
                    self.slots.swap(i, i + 1);
                }
            }
        }
    }

    pub fn snapshot(&self) -> Vec<LeaderboardEntry> {
        self.slots.iter().flatten().cloned().collect()
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.slots.iter().flatten().any(|e| e.player_id == player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    fn entry(id: PlayerId, highscore: i32) -> LeaderboardEntry {
        LeaderboardEntry {
            player_id: id,
            username: format!("player{}", id),
            highscore,
        }
    }

    fn scores(board: &Leaderboard) -> Vec<(PlayerId, i32)> {
        board.snapshot().iter().map(|e| (e.player_id, e.highscore)).collect()
    }

    #[test]
    fn test_fills_then_rejects_lower() {
        let mut board = Leaderboard::new();
        assert!(board.consider(entry(1, 300)));
        assert!(board.consider(entry(2, 200)));
        assert!(board.consider(entry(3, 100)));
        assert!(!board.consider(entry(4, 50)));
        assert_eq!(scores(&board), vec![(1, 300), (2, 200), (3, 100)]);
    }

    #[test]
    fn test_newcomer_displaces_outright() {
        let mut board = Leaderboard::new();
        board.consider(entry(1, 300));
        board.consider(entry(2, 200));
        board.consider(entry(3, 100));

        assert!(board.consider(entry(4, 250)));
        // player 2 is gone, not shifted into the third slot
        assert_eq!(scores(&board), vec![(1, 300), (4, 250), (3, 100)]);
        assert!(!board.contains(2));
    }

    #[test]
    fn test_existing_player_is_updated_in_place() {
        let mut board = Leaderboard::new();
        board.consider(entry(1, 300));
        board.consider(entry(2, 200));
        board.consider(entry(3, 100));

        assert!(board.consider(entry(3, 400)));
        assert_eq!(scores(&board), vec![(3, 400), (1, 300), (2, 200)]);
        assert!(!board.consider(entry(3, 400)));
    }

    #[test]
    fn test_ties_keep_earlier_player_first() {
        let mut board = Leaderboard::new();
        board.consider(entry(1, 100));
        board.consider(entry(2, 50));
        assert!(board.consider(entry(2, 100)));
        assert_eq!(scores(&board), vec![(1, 100), (2, 100)]);
    }

    proptest! {
        #[test]
        fn prop_no_duplicates_and_sorted(updates in prop::collection::vec((0i64..6, 0i32..50), 0..60)) {
            let mut board = Leaderboard::new();
            let mut highscores: HashMap<PlayerId, i32> = HashMap::new();
            for (id, gain) in updates {
                let hs = highscores.entry(id).or_insert(0);
                *hs += gain;
                board.consider(entry(id, *hs));

                let snapshot = board.snapshot();
                let unique: HashSet<PlayerId> = snapshot.iter().map(|e| e.player_id).collect();
                prop_assert_eq!(unique.len(), snapshot.len());
                prop_assert!(snapshot.windows(2).all(|w| w[0].highscore >= w[1].highscore));
            }
        }
    }
}
