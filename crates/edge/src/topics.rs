use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

/// In-process pub/sub table: room id → the user ids subscribed on this
/// edge. The subscriber set is the authoritative local fan-out target.
///
/// Publishers snapshot the set and release the lock before sending, so a
/// slow socket never holds the table.
pub struct RoomTopics {
    rooms: RwLock<HashMap<String, RoomTopic>>,
}

struct RoomTopic {
    name: String,
    subscribers: HashSet<i64>,
}

impl RoomTopics {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the table at boot. Rooms can still be added and removed later.
    pub async fn seed(&self, rooms: impl IntoIterator<Item = (String, String)>) {
        let mut table = self.rooms.write().await;
        for (id, name) in rooms {
            table.entry(id).or_insert_with(|| RoomTopic {
                name,
                subscribers: HashSet::new(),
            });
        }
    }

    /// Create a room topic. Existing subscribers are kept when the room is
    /// already present.
    pub async fn add_room(&self, id: &str, name: &str) {
        let mut table = self.rooms.write().await;
        table.entry(id.to_string()).or_insert_with(|| RoomTopic {
            name: name.to_string(),
            subscribers: HashSet::new(),
        });
    }

    /// Drop a room topic and its subscriber set.
    pub async fn remove_room(&self, id: &str) -> bool {
        self.rooms.write().await.remove(id).is_some()
    }

    /// Subscribe a user to every room currently in the table. Returns the
    /// room ids joined, which the caller mirrors into the routing store.
    pub async fn subscribe_all(&self, user_id: i64) -> Vec<String> {
        let mut table = self.rooms.write().await;
        let mut joined = Vec::with_capacity(table.len());
        for (id, topic) in table.iter_mut() {
            topic.subscribers.insert(user_id);
            joined.push(id.clone());
        }
        joined.sort();
        joined
    }

    /// Remove a user from every topic they joined.
    pub async fn unsubscribe_all(&self, user_id: i64) {
        let mut table = self.rooms.write().await;
        for topic in table.values_mut() {
            topic.subscribers.remove(&user_id);
        }
    }

    /// Copy-on-read snapshot of a room's subscribers. Empty when the room
    /// does not exist.
    pub async fn subscribers(&self, room_id: &str) -> Vec<i64> {
        let table = self.rooms.read().await;
        table
            .get(room_id)
            .map(|t| t.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `(id, name)` of every room, for the hello snapshot.
    pub async fn room_list(&self) -> Vec<(String, String)> {
        let table = self.rooms.read().await;
        let mut rooms: Vec<(String, String)> = table
            .iter()
            .map(|(id, t)| (id.clone(), t.name.clone()))
            .collect();
        rooms.sort();
        rooms
    }
}

impl Default for RoomTopics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_all_joins_every_seeded_room() {
        let topics = RoomTopics::new();
        topics
            .seed([
                ("0001".to_string(), "lobby".to_string()),
                ("0002".to_string(), "random".to_string()),
            ])
            .await;

        let joined = topics.subscribe_all(7).await;
        assert_eq!(joined, ["0001", "0002"]);
        assert_eq!(topics.subscribers("0001").await, [7]);
        assert_eq!(topics.subscribers("0002").await, [7]);
    }

    #[tokio::test]
    async fn unsubscribe_clears_the_user_everywhere() {
        let topics = RoomTopics::new();
        topics.seed([("0001".to_string(), "lobby".to_string())]).await;
        topics.subscribe_all(1).await;
        topics.subscribe_all(2).await;

        topics.unsubscribe_all(1).await;
        assert_eq!(topics.subscribers("0001").await, [2]);
    }

    #[tokio::test]
    async fn rooms_are_dynamic_over_a_static_seed() {
        let topics = RoomTopics::new();
        topics.seed([("0001".to_string(), "lobby".to_string())]).await;

        topics.add_room("0002", "random").await;
        assert_eq!(topics.room_list().await.len(), 2);

        assert!(topics.remove_room("0002").await);
        assert!(!topics.remove_room("0002").await);
        assert_eq!(topics.room_list().await.len(), 1);
    }

    #[tokio::test]
    async fn re_adding_a_room_keeps_subscribers() {
        let topics = RoomTopics::new();
        topics.add_room("0001", "lobby").await;
        topics.subscribe_all(9).await;

        topics.add_room("0001", "lobby-renamed").await;
        assert_eq!(topics.subscribers("0001").await, [9]);
    }

    #[tokio::test]
    async fn unknown_room_has_no_subscribers() {
        let topics = RoomTopics::new();
        assert!(topics.subscribers("nope").await.is_empty());
    }
}
