//! Identifier generation for rooms and members.

use gatehouse_core::{HubError, HubHandle, RoomId};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

/// Attempts at drawing a room id that is not already taken.
pub const ROOM_ID_ATTEMPTS: usize = 8;

const FRUITS: [&str; 10] = [
    "apple",
    "orange",
    "eggplant",
    "carrot",
    "cabbage",
    "pineapple",
    "grape",
    "strawberry",
    "blueberry",
    "kiwi",
];

/// Draw a random room id in `0..space`.
#[must_use]
pub fn random_room_id(space: u64) -> RoomId {
    rand::thread_rng().gen_range(0..space.max(1)).to_string()
}

/// Draw a room id that no room currently uses.
///
/// Gives up after [`ROOM_ID_ATTEMPTS`] and returns the last draw; if that
/// still collides, the hub demotes the second creator to a pending member.
///
/// # Errors
///
/// Returns an error if the hub has stopped.
pub async fn fresh_room_id(hub: &HubHandle, space: u64) -> Result<RoomId, HubError> {
    let mut room_id = random_room_id(space);
    for attempt in 1..ROOM_ID_ATTEMPTS {
        if !hub.room_exists(room_id.as_str()).await? {
            return Ok(room_id);
        }
        debug!(room = %room_id, attempt, "Room id taken, drawing again");
        room_id = random_room_id(space);
    }

    if hub.room_exists(room_id.as_str()).await? {
        warn!(room = %room_id, "Room id space crowded, using a taken id");
    }
    Ok(room_id)
}

/// Generate a display name like `kiwi-48213`.
#[must_use]
pub fn random_username() -> String {
    let mut rng = rand::thread_rng();
    let fruit = FRUITS.choose(&mut rng).copied().unwrap_or("kiwi");
    let number: u32 = rng.gen_range(10_000..=99_999);
    format!("{fruit}-{number}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{Admission, Hub, HubConfig, Registration};

    #[test]
    fn test_room_id_in_space() {
        for _ in 0..100 {
            let id: u64 = random_room_id(10).parse().unwrap();
            assert!(id < 10);
        }
        assert_eq!(random_room_id(1), "0");
        assert_eq!(random_room_id(0), "0");
    }

    #[test]
    fn test_username_shape() {
        for _ in 0..100 {
            let username = random_username();
            let (fruit, number) = username.rsplit_once('-').unwrap();
            assert!(FRUITS.contains(&fruit));
            assert_eq!(number.len(), 5);
            assert!(number.parse::<u32>().is_ok());
            assert!(gatehouse_protocol::validate_username(&username).is_ok());
        }
    }

    #[tokio::test]
    async fn test_fresh_room_id_free_space() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        assert_eq!(fresh_room_id(&hub, 1).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_fresh_room_id_all_taken() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let mut queues = Vec::new();
        for room in ["0", "1"] {
            let (admission, rx) = Admission::channel(Registration::owner(room, "apple-10000"), 4);
            hub.register(admission).await.unwrap();
            queues.push(rx);
        }

        // Every draw collides; the last one is handed back anyway
        let room_id = fresh_room_id(&hub, 2).await.unwrap();
        assert!(room_id == "0" || room_id == "1");
    }

    #[tokio::test]
    async fn test_fresh_room_id_crowded_space() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (admission, _rx) = Admission::channel(Registration::owner("0", "apple-10000"), 4);
        hub.register(admission).await.unwrap();

        assert_eq!(fresh_room_id(&hub, 1).await.unwrap(), "0");
    }
}
