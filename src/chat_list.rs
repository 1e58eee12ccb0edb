//! Cached chat list for the active database
//!
//! The server owns chats; the client keeps an ordered copy for display.
//! Order is starred chats first, then newest first. Local edits (create,
//! star, rename, delete) are applied optimistically and the list is
//! replaced wholesale whenever the server sends a fresh copy.

use crate::protocol::{ChatId, ChatSummary};

/// Ordered chat summaries of one database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatList {
    database: Option<String>,
    chats: Vec<ChatSummary>,
}

impl ChatList {
    /// Empty list not bound to any database
    pub fn new() -> Self {
        Self::default()
    }

    /// Database the list belongs to
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Chats in display order
    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    /// Look up a chat by id
    pub fn get(&self, id: ChatId) -> Option<&ChatSummary> {
        self.chats.iter().find(|c| c.id == id)
    }

    /// True when the list holds no chats
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Forget everything and bind to `database`
    pub fn reset(&mut self, database: Option<String>) {
        self.database = database;
        self.chats.clear();
    }

    /// Replace the list with a fresh server copy
    pub fn replace(&mut self, database: &str, mut chats: Vec<ChatSummary>) {
        sort(&mut chats);
        self.database = Some(database.to_string());
        self.chats = chats;
    }

    /// Insert a newly created chat at the top of its group
    pub fn insert_created(&mut self, chat: ChatSummary) {
        self.chats.retain(|c| c.id != chat.id);
        let position = if chat.starred {
            0
        } else {
            self.chats.iter().take_while(|c| c.starred).count()
        };
        self.chats.insert(position, chat);
    }

    /// Remove a chat; returns it when it was present
    pub fn remove(&mut self, id: ChatId) -> Option<ChatSummary> {
        let index = self.chats.iter().position(|c| c.id == id)?;
        Some(self.chats.remove(index))
    }

    /// Star or unstar a chat and reorder; returns false for unknown ids
    pub fn set_starred(&mut self, id: ChatId, starred: bool) -> bool {
        match self.chats.iter_mut().find(|c| c.id == id) {
            Some(chat) => {
                chat.starred = starred;
                sort(&mut self.chats);
                true
            }
            None => false,
        }
    }

    /// Rename a chat; returns false for unknown ids
    pub fn rename(&mut self, id: ChatId, title: &str) -> bool {
        match self.chats.iter_mut().find(|c| c.id == id) {
            Some(chat) => {
                chat.title = title.to_string();
                true
            }
            None => false,
        }
    }
}

fn sort(chats: &mut [ChatSummary]) {
    // stable: equal timestamps keep server order
    chats.sort_by(|a, b| {
        b.starred
            .cmp(&a.starred)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn chat(id: ChatId, minute: u32, starred: bool) -> ChatSummary {
        ChatSummary {
            id,
            title: format!("chat {}", id),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
            starred,
        }
    }

    fn ids(list: &ChatList) -> Vec<ChatId> {
        list.chats().iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_replace_orders_starred_then_newest() {
        let mut list = ChatList::new();
        list.replace(
            "Sales",
            vec![chat(1, 1, false), chat(2, 5, false), chat(3, 0, true), chat(4, 3, true)],
        );
        assert_eq!(ids(&list), vec![4, 3, 2, 1]);
        assert_eq!(list.database(), Some("Sales"));
    }

    #[test]
    fn test_created_chat_goes_below_starred() {
        let mut list = ChatList::new();
        list.replace("Sales", vec![chat(1, 1, false), chat(3, 0, true)]);
        list.insert_created(chat(9, 30, false));
        assert_eq!(ids(&list), vec![3, 9, 1]);
    }

    #[test]
    fn test_insert_created_is_idempotent() {
        let mut list = ChatList::new();
        list.insert_created(chat(9, 30, false));
        list.insert_created(chat(9, 30, false));
        assert_eq!(ids(&list), vec![9]);
    }

    #[test]
    fn test_star_moves_chat_to_top() {
        let mut list = ChatList::new();
        list.replace("Sales", vec![chat(1, 1, false), chat(2, 5, false)]);
        assert!(list.set_starred(1, true));
        assert_eq!(ids(&list), vec![1, 2]);
        assert!(list.set_starred(1, false));
        assert_eq!(ids(&list), vec![2, 1]);
        assert!(!list.set_starred(99, true));
    }

    #[test]
    fn test_remove_and_rename() {
        let mut list = ChatList::new();
        list.replace("Sales", vec![chat(1, 1, false), chat(2, 5, false)]);
        assert!(list.rename(2, "Index review"));
        assert_eq!(list.get(2).unwrap().title, "Index review");
        assert_eq!(list.remove(2).map(|c| c.id), Some(2));
        assert!(list.remove(2).is_none());
        assert_eq!(ids(&list), vec![1]);
    }

    #[test]
    fn test_reset_binds_new_database() {
        let mut list = ChatList::new();
        list.replace("Sales", vec![chat(1, 1, false)]);
        list.reset(Some("Inventory".to_string()));
        assert!(list.is_empty());
        assert_eq!(list.database(), Some("Inventory"));
    }
}
