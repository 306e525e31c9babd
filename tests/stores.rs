mod common;

use support_chat::db::{
    MessageRepository, NewNotification, NotificationFilter, NotificationOutcome,
    NotificationRepository, NotificationType, RoomKind, RoomRepository, SettingsUpdate,
    UserRepository,
};
use support_chat::error::AppError;

fn message_notification(recipient_id: i64, sender_id: i64) -> NewNotification {
    NewNotification {
        recipient_id,
        sender_id: Some(sender_id),
        kind: NotificationType::Message,
        title: "New message".to_string(),
        body: "hello".to_string(),
        chat_room_id: None,
        message_id: None,
    }
}

#[tokio::test]
async fn direct_room_is_unique_per_pair() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;

    let first = RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id)
        .await
        .unwrap();
    let second = RoomRepository::find_or_create_direct_room(&pool, bob.id, alice.id)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.kind, RoomKind::OneToOne);
    assert_eq!(RoomRepository::participants(&pool, first.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_direct_room_requests_converge() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;

    let (a, b) = tokio::join!(
        RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id),
        RoomRepository::find_or_create_direct_room(&pool, bob.id, alice.id),
    );

    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(
        RoomRepository::list_by_kind(&pool, RoomKind::OneToOne).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn direct_room_with_self_is_rejected() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;

    let result = RoomRepository::find_or_create_direct_room(&pool, alice.id, alice.id).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn community_creator_is_participant() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;

    let room = RoomRepository::create_community_room(&pool, "Support circle", alice.id)
        .await
        .unwrap();

    assert_eq!(room.kind, RoomKind::Community);
    assert!(RoomRepository::is_participant(&pool, alice.id, room.id).await.unwrap());
    assert!(!RoomRepository::is_participant(&pool, bob.id, room.id).await.unwrap());
    assert_eq!(RoomRepository::list_for_user(&pool, alice.id).await.unwrap().len(), 1);
    assert!(RoomRepository::list_for_user(&pool, bob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn save_into_missing_room_is_dropped() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;

    let saved = MessageRepository::save(&pool, alice.id, 4242, "hello").await.unwrap();
    assert!(saved.is_none());
}

#[tokio::test]
async fn unread_count_excludes_own_and_read_messages() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;
    let room = RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        let message = MessageRepository::save(&pool, alice.id, room.id, text)
            .await
            .unwrap()
            .unwrap();
        ids.push(message.id);
    }
    MessageRepository::save(&pool, bob.id, room.id, "reply").await.unwrap().unwrap();

    // Authored messages never count against the author.
    assert_eq!(MessageRepository::unread_count(&pool, room.id, alice.id).await.unwrap(), 1);
    assert_eq!(MessageRepository::unread_count(&pool, room.id, bob.id).await.unwrap(), 3);

    MessageRepository::mark_read(&pool, bob.id, &ids[..1]).await.unwrap();
    assert_eq!(MessageRepository::unread_count(&pool, room.id, bob.id).await.unwrap(), 2);
    assert!(MessageRepository::is_read_by(&pool, ids[0], bob.id).await.unwrap());
    assert!(!MessageRepository::is_read_by(&pool, ids[1], bob.id).await.unwrap());
}

#[tokio::test]
async fn mark_read_only_reports_new_markers() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;
    let room = RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id)
        .await
        .unwrap();
    let message = MessageRepository::save(&pool, alice.id, room.id, "hi")
        .await
        .unwrap()
        .unwrap();

    let first = MessageRepository::mark_read(&pool, bob.id, &[message.id, message.id])
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].message_id, message.id);
    assert_eq!(first[0].user_id, bob.id);

    let again = MessageRepository::mark_read(&pool, bob.id, &[message.id]).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn mark_all_unread_in_room_is_idempotent() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;
    let room = RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id)
        .await
        .unwrap();
    for text in ["a", "b"] {
        MessageRepository::save(&pool, alice.id, room.id, text).await.unwrap();
    }

    let first = MessageRepository::mark_all_unread_in_room(&pool, bob.id, room.id)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert!(first[0].message_id < first[1].message_id);

    let second = MessageRepository::mark_all_unread_in_room(&pool, bob.id, room.id)
        .await
        .unwrap();
    assert!(second.is_empty());
    assert_eq!(MessageRepository::unread_count(&pool, room.id, bob.id).await.unwrap(), 0);
}

#[tokio::test]
async fn readable_ids_skip_other_rooms_and_own_messages() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;
    let carol = common::user(&pool, "carol").await;
    let room = RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id)
        .await
        .unwrap();
    let other = RoomRepository::find_or_create_direct_room(&pool, carol.id, bob.id)
        .await
        .unwrap();

    let from_alice = MessageRepository::save(&pool, alice.id, room.id, "x").await.unwrap().unwrap();
    let from_bob = MessageRepository::save(&pool, bob.id, room.id, "y").await.unwrap().unwrap();
    let elsewhere = MessageRepository::save(&pool, carol.id, other.id, "z").await.unwrap().unwrap();

    let ids = MessageRepository::readable_ids(
        &pool,
        room.id,
        bob.id,
        &[from_alice.id, from_bob.id, elsewhere.id, 9999],
    )
    .await
    .unwrap();

    assert_eq!(ids, vec![from_alice.id]);
}

#[tokio::test]
async fn history_pages_walk_backwards_in_order() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let room = RoomRepository::create_community_room(&pool, "Lounge", alice.id)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let m = MessageRepository::save(&pool, alice.id, room.id, &format!("m{i}"))
            .await
            .unwrap()
            .unwrap();
        ids.push(m.id);
    }

    let latest = MessageRepository::get_page(&pool, room.id, None, 2).await.unwrap();
    assert_eq!(latest.iter().map(|m| m.id).collect::<Vec<_>>(), ids[3..].to_vec());

    let older = MessageRepository::get_page(&pool, room.id, Some(ids[3]), 2).await.unwrap();
    assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), ids[1..3].to_vec());
    assert_eq!(older[0].author_username, "alice");
}

#[tokio::test]
async fn unread_counts_cover_every_room_of_user() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;
    let carol = common::user(&pool, "carol").await;
    let with_alice = RoomRepository::find_or_create_direct_room(&pool, alice.id, bob.id)
        .await
        .unwrap();
    let with_carol = RoomRepository::find_or_create_direct_room(&pool, carol.id, bob.id)
        .await
        .unwrap();
    MessageRepository::save(&pool, alice.id, with_alice.id, "one").await.unwrap();
    MessageRepository::save(&pool, alice.id, with_alice.id, "two").await.unwrap();

    let mut counts = MessageRepository::unread_counts_for_user(&pool, bob.id).await.unwrap();
    counts.sort();
    assert_eq!(counts, vec![(with_alice.id, 2), (with_carol.id, 0)]);
}

#[tokio::test]
async fn accepted_connection_is_symmetric() {
    let pool = common::pool().await;
    let seeker = common::user(&pool, "seeker").await;
    let listener = common::user(&pool, "listener").await;

    assert!(!UserRepository::has_accepted_connection(&pool, seeker.id, listener.id).await.unwrap());

    UserRepository::record_connection(&pool, seeker.id, listener.id, false).await.unwrap();
    assert!(!UserRepository::has_accepted_connection(&pool, seeker.id, listener.id).await.unwrap());

    UserRepository::record_connection(&pool, seeker.id, listener.id, true).await.unwrap();
    assert!(UserRepository::has_accepted_connection(&pool, listener.id, seeker.id).await.unwrap());
}

#[tokio::test]
async fn settings_default_to_enabled_and_accept_partial_updates() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;

    let defaults = NotificationRepository::settings(&pool, alice.id).await.unwrap();
    assert!(defaults.message_notifications);
    assert!(defaults.connection_notifications);
    assert!(defaults.system_notifications);

    let update = SettingsUpdate {
        message_notifications: Some(false),
        ..Default::default()
    };
    let updated = NotificationRepository::update_settings(&pool, alice.id, &update)
        .await
        .unwrap();
    assert!(!updated.message_notifications);
    assert!(updated.connection_notifications);

    let reloaded = NotificationRepository::settings(&pool, alice.id).await.unwrap();
    assert!(!reloaded.message_notifications);
}

#[tokio::test]
async fn disabled_category_suppresses_notifications() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;

    let update = SettingsUpdate {
        message_notifications: Some(false),
        ..Default::default()
    };
    NotificationRepository::update_settings(&pool, bob.id, &update).await.unwrap();

    let request = message_notification(bob.id, alice.id);
    let outcome = NotificationRepository::create_if_enabled(&pool, request)
        .await
        .unwrap();
    assert!(matches!(outcome, NotificationOutcome::Suppressed));
    assert_eq!(NotificationRepository::unread_count(&pool, bob.id).await.unwrap(), 0);

    let system = NewNotification {
        kind: NotificationType::System,
        sender_id: None,
        ..message_notification(bob.id, alice.id)
    };
    let outcome = NotificationRepository::create_if_enabled(&pool, system).await.unwrap();
    assert!(matches!(outcome, NotificationOutcome::Created(_)));
}

#[tokio::test]
async fn notifications_are_scoped_to_their_recipient() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;

    let NotificationOutcome::Created(created) =
        NotificationRepository::create_if_enabled(&pool, message_notification(bob.id, alice.id))
            .await
            .unwrap()
    else {
        panic!("notification should be created");
    };
    assert_eq!(created.sender_full_name.as_deref(), Some("Alice Example"));
    assert!(!created.is_read);

    assert!(NotificationRepository::get(&pool, created.id, alice.id).await.unwrap().is_none());
    let foreign_mark = NotificationRepository::mark_read(&pool, created.id, alice.id).await;
    assert!(foreign_mark.unwrap().is_none());
    assert!(!NotificationRepository::delete(&pool, created.id, alice.id).await.unwrap());

    let read = NotificationRepository::mark_read(&pool, created.id, bob.id)
        .await
        .unwrap()
        .unwrap();
    assert!(read.is_read);
    assert!(NotificationRepository::delete(&pool, created.id, bob.id).await.unwrap());
}

#[tokio::test]
async fn list_filters_and_stats() {
    let pool = common::pool().await;
    let alice = common::user(&pool, "alice").await;
    let bob = common::user(&pool, "bob").await;

    for _ in 0..3 {
        NotificationRepository::create_if_enabled(&pool, message_notification(bob.id, alice.id))
            .await
            .unwrap();
    }
    let request = NewNotification {
        kind: NotificationType::ConnectionRequest,
        ..message_notification(bob.id, alice.id)
    };
    NotificationRepository::create_if_enabled(&pool, request).await.unwrap();

    let all = NotificationFilter::default();
    let (page, total) = NotificationRepository::list(&pool, bob.id, &all, 1, 2)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(total, 4);

    let only_messages = NotificationFilter {
        kind: Some(NotificationType::Message),
        is_read: None,
    };
    let (_, total) = NotificationRepository::list(&pool, bob.id, &only_messages, 1, 20)
        .await
        .unwrap();
    assert_eq!(total, 3);

    assert_eq!(NotificationRepository::mark_all_read(&pool, bob.id).await.unwrap(), 4);
    assert_eq!(NotificationRepository::mark_all_read(&pool, bob.id).await.unwrap(), 0);

    let unread = NotificationFilter {
        kind: None,
        is_read: Some(false),
    };
    let (_, total) = NotificationRepository::list(&pool, bob.id, &unread, 1, 20).await.unwrap();
    assert_eq!(total, 0);

    let stats = NotificationRepository::stats(&pool, bob.id).await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.unread, 0);
    assert_eq!(stats.message, 3);
    assert_eq!(stats.connection, 1);
    assert_eq!(stats.system, 0);
}
