//! Behavior shared by every cache backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use mirror_cache::model::{
  DataModel, DataObject, Payload, Persistence, Role, Space, SpaceChannel, SpaceMember, SpaceType,
};
use mirror_cache::{CacheStore, MemoryStore, SqlStore};

const MOOD_NS: &str = "mirror:application:moodmap:mood";
const MOOD_V1: &str = "http://data.mirror-demo.eu/application/moodmap/mood-1.0.xsd";
const MOOD_V2: &str = "http://data.mirror-demo.eu/application/moodmap/mood-2.0.xsd";

fn backends() -> Vec<Box<dyn CacheStore>> {
  vec![
    Box::new(MemoryStore::new()),
    Box::new(SqlStore::open_in_memory().unwrap()),
  ]
}

fn team_space(id: &str) -> Space {
  Space::new(id, "Team", "mirror-demo.eu", SpaceType::Team, Persistence::Off)
    .with_member(SpaceMember::new("a@x", Role::Moderator))
    .with_channel(
      SpaceChannel::new("pubsub")
        .with_property("domain", "pubsub.mirror-demo.eu")
        .with_property("node", format!("spaces#{}", id)),
    )
}

fn mood(id: &str, schema: &str) -> DataObject {
  let body = format!(
    r#"<mood xmlns="{}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="{} {}" id="{}"><value>5</value></mood>"#,
    MOOD_NS, MOOD_NS, schema, id
  );
  DataObject::parse(id, "mood", MOOD_NS, body).unwrap()
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
  ids.sort();
  ids
}

#[test]
fn test_space_roundtrip_and_clear() {
  for store in backends() {
    let space = team_space("s1");
    store.save_space(&space, "u1").unwrap();

    assert!(store.is_space_cached("s1").unwrap());
    let cached = store.cached_spaces_for_user("u1").unwrap();
    assert_eq!(cached, vec![space], "{}", store.backend_name());
    assert_eq!(cached[0].members.iter().next().map(|m| m.role), Some(Role::Moderator));

    store.clear_spaces_cache().unwrap();
    assert!(!store.is_space_cached("s1").unwrap());
    assert!(store.cached_spaces_for_user("u1").unwrap().is_empty());
  }
}

#[test]
fn test_save_spaces_is_additive() {
  for store in backends() {
    store.save_spaces(&[team_space("s1"), team_space("s2")], "u1").unwrap();
    store.save_spaces(&[team_space("s3")], "u1").unwrap();

    assert_eq!(
      sorted(store.space_ids_for_user("u1").unwrap()),
      vec!["s1", "s2", "s3"],
      "{}",
      store.backend_name()
    );
  }
}

#[test]
fn test_resaving_does_not_duplicate() {
  for store in backends() {
    store.save_space(&team_space("s1"), "u1").unwrap();
    store.save_space(&team_space("s1"), "u1").unwrap();
    assert_eq!(store.space_ids_for_user("u1").unwrap(), vec!["s1".to_string()]);
  }
}

#[test]
fn test_space_shared_by_two_users() {
  for store in backends() {
    store.save_space(&team_space("s1"), "u1").unwrap();
    store.save_space(&team_space("s1"), "u2").unwrap();
    store.save_space(&team_space("s2"), "u1").unwrap();

    store.delete_cached_spaces_for_user("u1").unwrap();
    assert!(store.space_ids_for_user("u1").unwrap().is_empty());
    assert!(store.is_space_cached("s1").unwrap(), "{}", store.backend_name());
    assert!(!store.is_space_cached("s2").unwrap());
    assert_eq!(store.cached_spaces_for_user("u2").unwrap(), vec![team_space("s1")]);

    store.delete_cached_spaces_for_user("u2").unwrap();
    assert!(!store.is_space_cached("s1").unwrap());
  }
}

#[test]
fn test_delete_space_removes_it_for_all_users() {
  for store in backends() {
    store.save_space(&team_space("s1"), "u1").unwrap();
    store.save_space(&team_space("s1"), "u2").unwrap();

    store.delete_cached_space("s1").unwrap();
    assert!(!store.is_space_cached("s1").unwrap());
    assert!(store.space_ids_for_user("u1").unwrap().is_empty());
    assert!(store.space_ids_for_user("u2").unwrap().is_empty());
  }
}

#[test]
fn test_update_is_idempotent() {
  for store in backends() {
    store.save_space(&team_space("s1"), "u1").unwrap();

    let updated = team_space("s1")
      .with_member(SpaceMember::new("b@x", Role::Member))
      .with_channel(SpaceChannel::new("orga").with_property("node", "orga#s1"));
    store.update_cached_space(&updated).unwrap();
    store.update_cached_space(&updated).unwrap();

    assert_eq!(store.cached_spaces_for_user("u1").unwrap(), vec![updated]);
  }
}

#[test]
fn test_update_of_uncached_space_is_ignored() {
  for store in backends() {
    store.update_cached_space(&team_space("ghost")).unwrap();
    assert!(!store.is_space_cached("ghost").unwrap());
  }
}

#[test]
fn test_channels_without_properties_are_dropped() {
  for store in backends() {
    let space = team_space("s1").with_channel(SpaceChannel::new("empty"));
    store.save_space(&space, "u1").unwrap();

    assert_eq!(store.cached_spaces_for_user("u1").unwrap(), vec![team_space("s1")]);
  }
}

#[test]
fn test_invalid_spaces_are_rejected() {
  for store in backends() {
    let mut nameless = team_space("s2");
    nameless.name = String::new();

    assert!(store.save_space(&nameless, "u1").is_err());
    assert!(store.save_spaces(&[team_space("s1"), nameless], "u1").is_err());
    assert!(store.space_ids_for_user("u1").unwrap().is_empty());
  }
}

#[test]
fn test_payload_queue() {
  for store in backends() {
    let payload = Payload::new("mood", MOOD_NS, "<mood xmlns=\"mirror:application:moodmap:mood\"/>");
    store.save_payload_to_send("u1", "p1", "s1", &payload).unwrap();
    store
      .save_payload_to_send("u2", "p2", "s1", &Payload::new("mood", MOOD_NS, "<mood/>"))
      .unwrap();

    let queued = store.payloads_to_send("u1").unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued.get("p1"), Some(&payload));
    assert_eq!(store.space_for_payload("p1").unwrap().as_deref(), Some("s1"));
    assert_eq!(store.space_for_payload("missing").unwrap(), None);

    store.delete_payload_to_send("p1").unwrap();
    assert!(store.payloads_to_send("u1").unwrap().is_empty());

    store.clear_send_cache("u2").unwrap();
    assert_eq!(store.space_for_payload("p2").unwrap(), None);
  }
}

#[test]
fn test_data_object_lifecycle() {
  for store in backends() {
    assert!(!store.is_data_object_cached("m1").unwrap());

    let object = mood("m1", MOOD_V1);
    store.save_data_object("s1", &object).unwrap();
    assert!(store.is_data_object_cached("m1").unwrap());
    assert_eq!(store.cached_data_objects("s1").unwrap(), vec![object]);
    assert!(store.cached_data_objects("s2").unwrap().is_empty());

    store.delete_cached_data_objects_for_space("s1").unwrap();
    assert!(!store.is_data_object_cached("m1").unwrap());
  }
}

#[test]
fn test_object_id_moves_with_resave() {
  for store in backends() {
    store.save_data_object("s1", &mood("m1", MOOD_V1)).unwrap();
    store.save_data_object("s2", &mood("m1", MOOD_V1)).unwrap();

    assert!(store.cached_data_objects("s1").unwrap().is_empty());
    assert_eq!(store.cached_data_objects("s2").unwrap().len(), 1);
  }
}

#[test]
fn test_prune_keeps_supported_models() {
  for store in backends() {
    store.save_data_object("s1", &mood("m1", MOOD_V1)).unwrap();
    store.save_data_object("s1", &mood("m2", MOOD_V2)).unwrap();

    let supported: HashSet<DataModel> = [DataModel::new(MOOD_NS, MOOD_V1)].into_iter().collect();
    store.update_cached_data_objects(&supported).unwrap();

    assert!(store.is_data_object_cached("m1").unwrap(), "{}", store.backend_name());
    assert!(!store.is_data_object_cached("m2").unwrap());

    store.update_cached_data_objects(&HashSet::new()).unwrap();
    assert!(!store.is_data_object_cached("m1").unwrap());
  }
}

#[test]
fn test_bulk_clears() {
  for store in backends() {
    store.save_space(&team_space("s1"), "u1").unwrap();
    store
      .save_payload_to_send("u1", "p1", "s1", &Payload::new("mood", MOOD_NS, "<mood/>"))
      .unwrap();
    store.save_data_object("s1", &mood("m1", MOOD_V1)).unwrap();

    store.clear_saved_data_objects().unwrap();
    assert!(!store.is_data_object_cached("m1").unwrap());
    assert_eq!(store.payloads_to_send("u1").unwrap().len(), 1);

    store.save_data_object("s1", &mood("m1", MOOD_V1)).unwrap();
    store.clear_data_cache().unwrap();
    assert!(!store.is_data_object_cached("m1").unwrap());
    assert!(store.payloads_to_send("u1").unwrap().is_empty());
    assert!(store.is_space_cached("s1").unwrap());
  }
}

#[test]
fn test_operations_on_empty_cache() {
  for store in backends() {
    assert!(store.space_ids_for_user("nobody").unwrap().is_empty());
    assert!(store.cached_spaces_for_user("nobody").unwrap().is_empty());
    store.delete_cached_space("none").unwrap();
    store.delete_cached_spaces_for_user("nobody").unwrap();
    store.delete_payload_to_send("none").unwrap();
    store.clear_send_cache("nobody").unwrap();
    store.clear_data_cache().unwrap();
    store.clear_spaces_cache().unwrap();
  }
}

#[test]
fn test_duplicate_members_and_channel_types_agree_across_backends() {
  let space = team_space("s1")
    .with_member(SpaceMember::new("a@x", Role::Member))
    .with_member(SpaceMember::new("b@x", Role::Owner))
    .with_channel(SpaceChannel::new("pubsub").with_property("node", "spaces#other"))
    .with_channel(SpaceChannel::new("muc").with_property("jid", "room@conference.x"));

  let mut results = Vec::new();
  for store in backends() {
    store.save_space(&space, "u1").unwrap();
    store.update_cached_space(&space).unwrap();
    let cached = store.cached_spaces_for_user("u1").unwrap();
    assert_eq!(cached, vec![space.normalized()], "{}", store.backend_name());

    let stored = &cached[0];
    assert_eq!(
      stored.members.iter().map(|m| (m.address.as_str(), m.role)).collect::<Vec<_>>(),
      vec![("a@x", Role::Moderator), ("b@x", Role::Owner)]
    );
    assert_eq!(stored.channels.len(), 2);
    results.push(cached);
  }
  assert_eq!(results[0], results[1]);
}

fn wide_space(id: &str, variant: usize) -> Space {
  let base = Space::new(id, "Team", "mirror-demo.eu", SpaceType::Team, Persistence::On);
  if variant % 2 == 0 {
    base
      .with_member(SpaceMember::new("a@x", Role::Moderator))
      .with_member(SpaceMember::new("b@x", Role::Member))
      .with_channel(
        SpaceChannel::new("pubsub")
          .with_property("domain", "pubsub.mirror-demo.eu")
          .with_property("node", format!("spaces#{}", id)),
      )
  } else {
    base
      .with_member(SpaceMember::new("c@x", Role::Owner))
      .with_member(SpaceMember::new("d@x", Role::Member))
      .with_member(SpaceMember::new("e@x", Role::Member))
      .with_channel(SpaceChannel::new("pubsub").with_property("node", format!("orga#{}", id)))
      .with_channel(SpaceChannel::new("muc").with_property("jid", "room@conference.x"))
  }
}

#[test]
fn test_readers_never_see_partial_spaces() {
  for store in backends() {
    let store: Arc<dyn CacheStore> = Arc::from(store);
    let variants = [wide_space("s1", 0), wide_space("s1", 1)];
    store.save_space(&variants[0], "u1").unwrap();

    thread::scope(|scope| {
      let writer = Arc::clone(&store);
      scope.spawn(move || {
        for i in 0..200 {
          if i % 3 == 0 {
            writer.save_space(&wide_space("s1", i), "u1").unwrap();
          } else {
            writer.update_cached_space(&wide_space("s1", i)).unwrap();
          }
        }
      });

      for _ in 0..2 {
        let reader = Arc::clone(&store);
        let variants = &variants;
        scope.spawn(move || {
          for _ in 0..200 {
            let cached = reader.cached_spaces_for_user("u1").unwrap();
            assert_eq!(cached.len(), 1, "{}", reader.backend_name());
            assert!(
              variants.contains(&cached[0]),
              "{} returned a partial space: {:?}",
              reader.backend_name(),
              cached[0]
            );
          }
        });
      }
    });
  }
}

#[test]
fn test_prune_keeps_concurrently_saved_supported_objects() {
  for store in backends() {
    let store: Arc<dyn CacheStore> = Arc::from(store);
    let supported: HashSet<DataModel> = [DataModel::new(MOOD_NS, MOOD_V1)].into_iter().collect();

    thread::scope(|scope| {
      let writer = Arc::clone(&store);
      scope.spawn(move || {
        for i in 0..100 {
          writer.save_data_object("s1", &mood(&format!("m{}", i), MOOD_V1)).unwrap();
          writer.save_data_object("s1", &mood(&format!("old{}", i), MOOD_V2)).unwrap();
        }
      });

      let pruner = Arc::clone(&store);
      let supported = &supported;
      scope.spawn(move || {
        for _ in 0..100 {
          pruner.update_cached_data_objects(supported).unwrap();
        }
      });
    });

    for i in 0..100 {
      assert!(
        store.is_data_object_cached(&format!("m{}", i)).unwrap(),
        "{} lost m{}",
        store.backend_name(),
        i
      );
    }
    store.update_cached_data_objects(&supported).unwrap();
    assert_eq!(store.cached_data_objects("s1").unwrap().len(), 100);
  }
}
