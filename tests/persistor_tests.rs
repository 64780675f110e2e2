mod common;

use common::{ModA, RecordingTimers, TestModel, doc, persist_config, start_engine};
use gamepersist::actor::{ActorMessage, ActorUid, LocalRouter, LocalTimers, TimerHandle};
use gamepersist::core::PersistError;
use gamepersist::entity::player::{BaseInfo, module_registry};
use gamepersist::entity::{EntityActor, Player, PlayerActor, run_entity};
use gamepersist::persist::model::{DirtyAware, ModuleContainer};
use gamepersist::persist::store::{StoreCall, StoreCallKind};
use gamepersist::persist::{
    MemoryStore, Namespace, PersistentActor, Persistor, SaveSchedulePolicy, TimerSaveMode,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

type TestActor = EntityActor<TestModel>;

struct Harness {
    store: MemoryStore,
    router: Arc<LocalRouter>,
    timers: Arc<RecordingTimers>,
    persistor: Persistor,
}

impl Harness {
    fn new(timer_save: TimerSaveMode) -> Self {
        let store = MemoryStore::new();
        let router = Arc::new(LocalRouter::default());
        let mut config = persist_config();
        config.schedule.timer_save = timer_save;
        let persistor = Persistor::new(start_engine(&store), &config, router.clone());
        Self {
            store,
            router,
            timers: Arc::new(RecordingTimers::default()),
            persistor,
        }
    }

    fn actor(&self, id: i64) -> TestActor {
        EntityActor::new(
            ActorUid::player(id),
            TestModel::new(id),
            self.timers.clone(),
            SaveSchedulePolicy::default(),
        )
    }

    fn player(&self, id: i64) -> PlayerActor {
        PlayerActor::player(
            id,
            module_registry(),
            self.timers.clone(),
            SaveSchedulePolicy::default(),
        )
    }

    fn updates(&self) -> Vec<StoreCall> {
        self.store
            .calls()
            .into_iter()
            .filter(|call| call.kind == StoreCallKind::Update)
            .collect()
    }

    fn finds(&self) -> usize {
        self.store
            .calls()
            .iter()
            .filter(|call| call.kind == StoreCallKind::Find)
            .count()
    }
}

fn set_module_a(actor: &mut TestActor, value: &str) {
    actor
        .inner_mut()
        .state
        .module::<ModA>(true)
        .update(|a| a.value = value.to_string());
}

#[tokio::test]
async fn partial_save_sets_only_the_dirty_module() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(42);
    set_module_a(&mut actor, "x");

    h.persistor.save(actor.model()).await.unwrap();

    assert_eq!(
        h.store.calls(),
        vec![StoreCall {
            kind: StoreCallKind::Update,
            namespace: Namespace::new("game", "test_models"),
            filter: doc(json!({"id": 42})),
            set: Some(doc(json!({"modules.A": {"value": "x"}}))),
            upsert: false,
        }]
    );
    assert_eq!(actor.inner().state.is_dirty(), (false, false));
}

#[tokio::test]
async fn clean_model_save_does_no_io() {
    let h = Harness::new(TimerSaveMode::Sync);
    let actor = h.actor(1);

    h.persistor.save(actor.model()).await.unwrap();
    h.persistor.save_async(actor.uid(), actor.model()).await.unwrap();
    h.persistor.engine().stop().await;

    assert!(h.store.calls().is_empty());
    assert_eq!(h.timers.started(), 0);
}

#[tokio::test]
async fn dirty_entries_for_vanished_modules_send_no_update() {
    let h = Harness::new(TimerSaveMode::Sync);
    let actor = h.actor(2);
    actor.inner().state.tracker().on_module_dirty("gone");
    assert_eq!(actor.inner().state.is_dirty(), (true, false));

    h.persistor.save(actor.model()).await.unwrap();
    h.persistor.save_async(actor.uid(), actor.model()).await.unwrap();
    h.persistor.engine().stop().await;

    assert!(h.store.calls().is_empty());
    assert_eq!(actor.inner().state.is_dirty(), (false, false));
}

#[tokio::test]
async fn initialized_player_is_upserted_whole() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.player(5);
    assert!(actor.inner_mut().init());

    h.persistor.save(actor.model()).await.unwrap();

    let updates = h.updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].upsert);
    let stored = h
        .store
        .find(&Namespace::new("game", "players"), &doc(json!({"id": 5})))
        .unwrap();
    assert_eq!(
        Value::Object(stored),
        json!({"id": 5, "version": 1, "modules": {"base": {"name": "player5"}}})
    );
    assert_eq!(actor.inner().state().is_dirty(), (false, false));
}

#[tokio::test]
async fn loading_a_missing_document_keeps_the_zero_value() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.player(99);

    h.persistor.start_entity(&mut actor).await.unwrap();

    assert_eq!(h.finds(), 1);
    assert_eq!(actor.inner().version(), 0);
    assert!(!actor.inner().is_init());
    assert_eq!(actor.inner().state().is_dirty(), (false, false));
    assert_eq!(h.timers.started(), 0);
}

#[tokio::test]
async fn load_restores_a_stored_player() {
    let h = Harness::new(TimerSaveMode::Sync);
    h.store.insert(
        &Namespace::new("game", "players"),
        doc(json!({"id": 8, "version": 2, "modules": {"base": {"name": "morpheus"}}})),
    );
    let mut player = Player::new(8, module_registry());

    h.persistor.load(&mut player).await.unwrap();

    assert_eq!(player.version(), 2);
    assert_eq!(player.module::<BaseInfo>(false).name, "morpheus");
}

#[tokio::test(start_paused = true)]
async fn load_retries_transient_errors_only() {
    let h = Harness::new(TimerSaveMode::Sync);
    h.store.insert(
        &Namespace::new("game", "test_models"),
        doc(json!({"id": 3, "modules": {"A": {"value": "kept"}}})),
    );

    let mut model = TestModel::new(3);
    h.store
        .fail_next_finds(2, PersistError::Network("connection reset".into()));
    h.persistor.load(&mut model).await.unwrap();
    assert_eq!(h.finds(), 3);
    assert_eq!(model.state.module::<ModA>(false).value, "kept");

    h.store.clear_calls();
    h.store
        .fail_next_finds(1, PersistError::Store("unauthorized".into()));
    let err = h.persistor.load(&mut TestModel::new(3)).await.unwrap_err();
    assert_eq!(err, PersistError::Store("unauthorized".into()));
    assert_eq!(h.finds(), 1);

    h.store.clear_calls();
    h.store
        .fail_next_finds(4, PersistError::Network("connection reset".into()));
    let err = h.persistor.load(&mut TestModel::new(3)).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.finds(), 4);
}

#[tokio::test(start_paused = true)]
async fn save_gives_up_after_four_attempts_and_stays_dirty() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(4);
    set_module_a(&mut actor, "x");
    h.store
        .fail_next_updates(4, PersistError::Store("write conflict".into()));

    let err = h.persistor.save(actor.model()).await.unwrap_err();

    assert_eq!(err, PersistError::Store("write conflict".into()));
    assert_eq!(h.updates().len(), 4);
    assert_eq!(actor.inner().state.is_dirty(), (true, false));
}

#[tokio::test(start_paused = true)]
async fn save_succeeds_once_the_store_recovers() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(4);
    set_module_a(&mut actor, "x");
    h.store
        .fail_next_updates(2, PersistError::Network("timeout".into()));

    h.persistor.save(actor.model()).await.unwrap();

    assert_eq!(h.updates().len(), 3);
    assert_eq!(actor.inner().state.is_dirty(), (false, false));
}

#[tokio::test]
async fn repeated_mutations_arm_a_single_timer() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(6);
    for value in ["a", "b", "c"] {
        set_module_a(&mut actor, value);
    }
    actor.inner().state.set_dirty_all();

    assert_eq!(h.timers.started(), 1);
    let (handle, delay) = h.timers.last().unwrap();
    assert_eq!(actor.scheduler().armed_timer(), Some(handle));
    assert!(delay >= Duration::from_secs(5) && delay < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn failed_timer_save_rearms_with_retry_delay() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(7);
    set_module_a(&mut actor, "x");
    let (fired, _) = h.timers.last().unwrap();
    h.store
        .fail_next_updates(4, PersistError::Store("disk full".into()));

    h.persistor
        .dispatch(&actor, ActorMessage::TimerFired(fired))
        .await;

    assert_eq!(h.timers.started(), 2);
    let (rearmed, delay) = h.timers.last().unwrap();
    assert_ne!(rearmed, fired);
    assert_eq!(delay, Duration::from_secs(5));
    assert_eq!(actor.scheduler().armed_timer(), Some(rearmed));
    assert_eq!(actor.inner().state.is_dirty(), (true, false));

    // next fire succeeds and leaves nothing armed
    h.persistor
        .dispatch(&actor, ActorMessage::TimerFired(rearmed))
        .await;
    assert!(!actor.scheduler().is_scheduled());
    assert_eq!(h.timers.started(), 2);
    assert_eq!(actor.inner().state.is_dirty(), (false, false));
}

#[tokio::test]
async fn stale_timer_fire_keeps_the_armed_timer() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(8);
    set_module_a(&mut actor, "x");
    let (armed, _) = h.timers.last().unwrap();

    h.persistor.on_save_timer(&actor, TimerHandle(7)).await;

    assert_eq!(actor.scheduler().armed_timer(), Some(armed));
    assert_eq!(h.updates().len(), 1);
    assert_eq!(actor.inner().state.is_dirty(), (false, false));
}

#[tokio::test]
async fn async_save_failures_feed_back_until_a_write_lands() {
    let h = Harness::new(TimerSaveMode::Async);
    let uid = ActorUid::player(9);
    let mut mailbox = h.router.register(uid);
    let mut actor = h.actor(9);
    set_module_a(&mut actor, "x");
    h.store
        .fail_next_updates(3, PersistError::Network("primary stepped down".into()));

    for round in 0..3 {
        let (handle, _) = h.timers.last().unwrap();
        h.persistor
            .dispatch(&actor, ActorMessage::TimerFired(handle))
            .await;
        // cleared once queued, before the write result is known
        assert_eq!(actor.inner().state.is_dirty(), (false, false));

        let message = mailbox.recv().await.unwrap();
        assert_eq!(message, ActorMessage::SaveResult { success: false });
        h.persistor.dispatch(&actor, message).await;
        assert_eq!(actor.inner().state.is_dirty(), (true, true));
        assert_eq!(h.timers.started(), round + 2);
    }

    let (handle, _) = h.timers.last().unwrap();
    h.persistor
        .dispatch(&actor, ActorMessage::TimerFired(handle))
        .await;
    h.persistor.engine().stop().await;

    assert!(mailbox.try_recv().is_err());
    let upserts: Vec<bool> = h.updates().iter().map(|call| call.upsert).collect();
    assert_eq!(upserts, vec![false, true, true, true]);
    assert_eq!(h.timers.started(), 4);
    assert!(!actor.scheduler().is_scheduled());
    assert!(
        h.store
            .find(&Namespace::new("game", "test_models"), &doc(json!({"id": 9})))
            .is_some()
    );
}

#[tokio::test]
async fn save_result_success_is_ignored() {
    let h = Harness::new(TimerSaveMode::Async);
    let actor = h.actor(10);

    assert!(!h.persistor.on_save_result(&actor, true));
    assert!(h.persistor.on_save_result(&actor, false));
    assert_eq!(actor.inner().state.is_dirty(), (true, true));
    assert_eq!(h.timers.started(), 1);
}

#[tokio::test]
async fn stop_entity_saves_cancels_and_releases() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(11);
    set_module_a(&mut actor, "bye");
    let (armed, _) = h.timers.last().unwrap();

    h.persistor.stop_entity(&mut actor).await;

    assert_eq!(h.timers.stopped(), vec![armed]);
    assert!(!actor.scheduler().is_scheduled());
    assert_eq!(
        h.updates()[0].set,
        Some(doc(json!({"modules.A": {"value": "bye"}})))
    );
    assert!(actor.inner().state.modules().is_empty());
    assert_eq!(actor.inner().state.is_dirty(), (false, false));
}

#[tokio::test]
async fn stop_entity_on_clean_model_skips_the_save() {
    let h = Harness::new(TimerSaveMode::Sync);
    let mut actor = h.actor(12);

    h.persistor.stop_entity(&mut actor).await;

    assert!(h.store.calls().is_empty());
    assert!(h.timers.stopped().is_empty());
}

#[tokio::test(start_paused = true)]
async fn entity_lifecycle_over_local_runtime() {
    let store = MemoryStore::new();
    let router = Arc::new(LocalRouter::default());
    let timers = Arc::new(LocalTimers::new(router.clone()));
    let config = persist_config();
    let persistor = Arc::new(Persistor::new(start_engine(&store), &config, router.clone()));

    let uid = ActorUid::player(5);
    let mailbox = router.register(uid);
    let mut actor =
        PlayerActor::player(5, module_registry(), timers.clone(), config.schedule.clone());
    assert!(actor.inner_mut().init());
    assert_eq!(timers.active(), 1);

    let running = tokio::spawn(run_entity(persistor.clone(), actor, mailbox));

    let players = Namespace::new("game", "players");
    let mut stored = None;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        stored = store.find(&players, &doc(json!({"id": 5})));
        if stored.is_some() {
            break;
        }
    }
    assert_eq!(
        stored.map(Value::Object),
        Some(json!({"id": 5, "version": 1, "modules": {"base": {"name": "player5"}}}))
    );

    router.unregister(&uid);
    let actor = running.await.unwrap().unwrap();
    assert_eq!(actor.inner().version(), 1);
    assert!(!actor.scheduler().is_scheduled());
    assert_eq!(timers.active(), 0);
    persistor.engine().stop().await;
}
