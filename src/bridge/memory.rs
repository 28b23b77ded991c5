//! Rolling conversation memory

use super::prompt::PromptTemplate;
use std::collections::VecDeque;

/// Number of exchanges kept by default
pub const DEFAULT_MEMORY_CAPACITY: usize = 10;

/// One remembered user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Bounded FIFO of recent exchanges. Inserting into a full memory evicts the
/// oldest exchange.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    capacity: usize,
    exchanges: VecDeque<Exchange>,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            exchanges: VecDeque::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.exchanges.len() == self.capacity {
            self.exchanges.pop_front();
        }
        self.exchanges.push_back(Exchange {
            user: user.into(),
            assistant: assistant.into(),
        });
    }

    /// Full prompt: prefix, remembered exchanges oldest first, then the
    /// current user turn.
    pub fn render(&self, template: &PromptTemplate, current: &str) -> String {
        let mut prompt = template.interpolated_prefix();
        for exchange in &self.exchanges {
            prompt.push_str(&exchange.user);
            prompt.push_str(&template.postfix);
            prompt.push_str(&exchange.assistant);
            prompt.push_str(&template.turn_separator);
        }
        prompt.push_str(current);
        prompt.push_str(&template.postfix);
        prompt
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..4 {
            memory.append(format!("q{}", i), format!("a{}", i));
        }

        let users: Vec<_> = memory.exchanges().map(|e| e.user.as_str()).collect();
        assert_eq!(users, vec!["q1", "q2", "q3"]);
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn test_default_capacity_window() {
        let mut memory = ConversationMemory::default();
        for i in 0..=DEFAULT_MEMORY_CAPACITY {
            memory.append(format!("q{}", i), "a");
        }
        assert_eq!(memory.len(), DEFAULT_MEMORY_CAPACITY);
        assert_eq!(memory.exchanges().next().unwrap().user, "q1");
        assert_eq!(memory.exchanges().last().unwrap().user, "q10");
    }

    #[test]
    fn test_render_orders_turns() {
        let template = PromptTemplate {
            prefix: "[S]".to_string(),
            postfix: "[A]".to_string(),
            system_prompt: String::new(),
            turn_separator: "[U]".to_string(),
        };
        let mut memory = ConversationMemory::new(2);
        memory.append("hi", "hello");
        memory.append("2+2?", "4");

        assert_eq!(
            memory.render(&template, "and 3+3?"),
            "[S]hi[A]hello[U]2+2?[A]4[U]and 3+3?[A]"
        );
    }

    #[test]
    fn test_empty_memory_matches_single_turn() {
        let template = PromptTemplate::default();
        let memory = ConversationMemory::new(4);
        assert_eq!(memory.render(&template, "ping"), template.wrap("ping"));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut memory = ConversationMemory::new(0);
        memory.append("q", "a");
        assert!(memory.is_empty());
    }
}
