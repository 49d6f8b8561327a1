//! Per-conversation turn history.

use crate::models::Turn;

/// Ordered list of turns for one conversation. With a turn limit set, the
/// oldest turns are dropped once the limit is exceeded.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<Turn>,
    max_turns: Option<usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that keeps at most `max_turns` turns.
    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: Some(max_turns),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        if let Some(max) = self.max_turns {
            let excess = self.turns.len().saturating_sub(max);
            self.turns.drain(..excess);
        }
    }

    /// The most recent `window` turns, oldest first.
    pub fn history(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_history_window_is_most_recent_in_order() {
        let mut s = Session::new();
        for i in 0..5 {
            s.append(Turn::user(format!("q{}", i)));
            s.append(Turn::assistant(format!("a{}", i), Vec::new()));
        }
        let texts: Vec<_> = s.history(3).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a3", "q4", "a4"]);
        assert_eq!(s.history(0).len(), 0);
        assert_eq!(s.history(100).len(), 10);
        assert_eq!(s.history(2)[0].role, Role::User);
    }

    #[test]
    fn test_turn_limit_drops_oldest() {
        let mut s = Session::with_max_turns(4);
        for i in 0..250 {
            s.append(Turn::user(format!("q{}", i)));
            s.append(Turn::assistant(format!("a{}", i), Vec::new()));
        }
        let texts: Vec<_> = s.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q248", "a248", "q249", "a249"]);
        assert_eq!(s.history(10).len(), 4);
    }

    #[test]
    fn test_clear() {
        let mut s = Session::new();
        s.append(Turn::user("hello"));
        assert_eq!(s.len(), 1);
        s.clear();
        assert!(s.is_empty());
        assert!(s.history(5).is_empty());
    }
}
