use std::collections::HashSet;

use tokio::sync::RwLock;
use uuid::Uuid;

/// Set of online user ids. Membership only: the dispatcher decides when a
/// user has no connections left and calls `remove`.
#[derive(Default)]
pub struct OnlineUsers {
    users: RwLock<HashSet<Uuid>>,
}

impl OnlineUsers {
    /// Returns true if the user was not already online.
    pub async fn add(&self, user_id: Uuid) -> bool {
        self.users.write().await.insert(user_id)
    }

    /// Returns true if the user was online.
    pub async fn remove(&self, user_id: Uuid) -> bool {
        self.users.write().await.remove(&user_id)
    }

    pub async fn contains(&self, user_id: Uuid) -> bool {
        self.users.read().await.contains(&user_id)
    }

    /// Sorted copy of the current set.
    pub async fn snapshot(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.users.read().await.iter().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_remove_snapshot() {
        let online = OnlineUsers::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(online.add(a).await);
        assert!(!online.add(a).await);
        assert!(online.add(b).await);

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(online.snapshot().await, expected);

        assert!(online.remove(a).await);
        assert!(!online.remove(a).await);
        assert!(!online.contains(a).await);
        assert_eq!(online.snapshot().await, vec![b]);
    }
}
