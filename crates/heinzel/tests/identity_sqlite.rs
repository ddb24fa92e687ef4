mod support;

use heinzel::prelude::*;
use heinzel::{ModelEvent, Observer, Phase, RelationAction, RelationEvent};
use std::cell::RefCell;
use std::rc::Rc;
use support::{context, context_with, create, id_of, text};

#[test]
fn sqlite_one_instance_per_row() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into()), ("year", 1974.into())]);
    let cars = ctx.objects("Car").unwrap();

    let by_name = cars.get(&mut ctx, Q::new("name", "Golf")).unwrap();
    let by_year = cars.get(&mut ctx, Q::new("year", 1974)).unwrap();
    assert_eq!(by_name, golf);
    assert_eq!(by_year, golf);

    ctx.set_field(golf, "name", "Golf GTI").unwrap();
    assert_eq!(text(&ctx, by_name, "name"), "Golf GTI");
}

#[test]
fn sqlite_reads_flush_pending_changes() {
    let mut ctx = context();
    let beetle = ctx
        .instantiate("Car", [("name", Value::from("Beetle"))])
        .unwrap();
    assert!(ctx.is_dirty(beetle));
    assert!(!ctx.is_cached(beetle));
    assert!(ctx.pk(beetle).unwrap().is_null());

    let cars = ctx.objects("Car").unwrap();
    assert_eq!(cars.count(&mut ctx).unwrap(), 1);
    assert!(!ctx.is_dirty(beetle));
    assert!(ctx.is_cached(beetle));
    assert_eq!(cars.get(&mut ctx, Q::new("name", "Beetle")).unwrap(), beetle);

    ctx.set_field(beetle, "year", 1938).unwrap();
    assert!(ctx.is_dirty(beetle));
    let found = cars.filter(Q::new("year", 1938)).unwrap().eval(&mut ctx).unwrap();
    assert_eq!(found, [beetle]);
}

#[test]
fn sqlite_field_access() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    assert_eq!(ctx.model_of(golf).unwrap(), "Car");
    assert_eq!(ctx.get_field(golf, "pk").unwrap(), ctx.pk(golf).unwrap());
    assert_eq!(ctx.get_field(golf, "brand").unwrap(), Value::Null);
    assert_eq!(ctx.get_field(golf, "brand_id").unwrap(), Value::Null);

    let err = ctx.get_field(golf, "colour").unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownName));
    let err = ctx.set_field(golf, "year", "old").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn sqlite_delete_forgets_instance() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    let cars = ctx.objects("Car").unwrap();

    ctx.delete(golf).unwrap();
    let err = cars.get(&mut ctx, Q::new("name", "Golf")).unwrap_err();
    assert!(err.is_does_not_exist());
    assert!(!ctx.is_alive(golf));
    assert!(!ctx.is_cached(golf));
    assert!(!ctx.is_dirty(golf));
    assert!(ctx.pk(golf).unwrap().is_null());

    let err = ctx.delete(golf).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Unsaved));

    ctx.release(golf).unwrap();
    let err = ctx.get_field(golf, "name").unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::StaleInstance));
}

#[test]
fn sqlite_do_not_cache_detaches_instance() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    ctx.do_not_cache(golf).unwrap();
    assert!(!ctx.is_alive(golf));
    assert!(!ctx.is_cached(golf));

    let cars = ctx.objects("Car").unwrap();
    let fresh = cars.get(&mut ctx, Q::new("name", "Golf")).unwrap();
    assert_ne!(fresh, golf);
    assert_eq!(text(&ctx, golf, "name"), "Golf");

    // Detached instances do not track changes.
    ctx.set_field(golf, "name", "Polo").unwrap();
    assert!(!ctx.is_dirty(golf));
    assert_eq!(text(&ctx, fresh, "name"), "Golf");
}

#[test]
fn sqlite_eviction_reloads() {
    let mut ctx = context_with(&Config::default().max_cache(2));
    let first = create(&mut ctx, "Manufacturer", &[("name", "Daimler".into())]);
    create(&mut ctx, "Manufacturer", &[("name", "BMW AG".into())]);
    create(&mut ctx, "Manufacturer", &[("name", "Volkswagen AG".into())]);
    assert_eq!(ctx.storage().cache_len(), 2);

    // Evicted but still held; the handle keeps working.
    assert!(!ctx.is_cached(first));
    assert!(ctx.is_alive(first));
    assert_eq!(text(&ctx, first, "name"), "Daimler");
    assert!(!ctx.meta(first).unwrap().was_reloaded);

    ctx.store()
        .execute(
            "UPDATE manufacturers SET name = ? WHERE name = ?",
            &[Value::from("Daimler-Benz"), Value::from("Daimler")],
        )
        .unwrap();
    ctx.store().commit().unwrap();

    let manufacturers = ctx.objects("Manufacturer").unwrap();
    let again = manufacturers.get(&mut ctx, Q::new("name", "Daimler-Benz")).unwrap();
    assert_eq!(again, first);
    assert!(ctx.meta(first).unwrap().was_reloaded);
    assert_eq!(text(&ctx, first, "name"), "Daimler-Benz");
    assert!(ctx.is_cached(first));
    assert_eq!(ctx.storage().cache_len(), 2);
}

#[test]
fn sqlite_eval_larger_than_cache_keeps_handles() {
    let mut ctx = context_with(&Config::default().max_cache(2));
    for (name, year) in [("Golf", 1974), ("Polo", 1975), ("Passat", 1973)] {
        create(&mut ctx, "Car", &[("name", name.into()), ("year", year.into())]);
    }

    let cars = ctx.objects("Car").unwrap();
    let all = cars.all().order_by(&["year"]).unwrap().eval(&mut ctx).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(ctx.storage().cache_len(), 2);
    assert_eq!(
        support::names(&ctx, &all, "name"),
        ["Passat", "Golf", "Polo"]
    );
    for car in &all {
        ctx.set_field(*car, "year", 2000).unwrap();
    }
    assert_eq!(cars.filter(Q::new("year", 2000)).unwrap().count(&mut ctx).unwrap(), 3);
}

#[test]
fn sqlite_release_evicted_frees_slots() {
    let mut ctx = context_with(&Config::default().max_cache(1));
    let first = create(&mut ctx, "Manufacturer", &[("name", "Daimler".into())]);
    let second = create(&mut ctx, "Manufacturer", &[("name", "BMW AG".into())]);
    assert_eq!(ctx.storage().len(), 2);

    assert_eq!(ctx.release_evicted(), 1);
    assert_eq!(ctx.storage().len(), 1);
    let err = ctx.get_field(first, "name").unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::StaleInstance));
    assert_eq!(text(&ctx, second, "name"), "BMW AG");

    let manufacturers = ctx.objects("Manufacturer").unwrap();
    let fresh = manufacturers.get(&mut ctx, Q::new("name", "Daimler")).unwrap();
    assert_ne!(fresh, first);
    assert!(!ctx.meta(fresh).unwrap().was_reloaded);
}

#[test]
fn sqlite_pinned_instance_survives_eviction() {
    let mut ctx = context_with(&Config::default().max_cache(2));
    let first = create(&mut ctx, "Manufacturer", &[("name", "Daimler".into())]);
    ctx.pin(first).unwrap();
    create(&mut ctx, "Manufacturer", &[("name", "BMW AG".into())]);
    create(&mut ctx, "Manufacturer", &[("name", "Volkswagen AG".into())]);

    assert!(ctx.is_alive(first));
    assert!(!ctx.is_cached(first));
    assert_eq!(ctx.release_evicted(), 0);
    let manufacturers = ctx.objects("Manufacturer").unwrap();
    let again = manufacturers.get(&mut ctx, Q::new("name", "Daimler")).unwrap();
    assert_eq!(again, first);
    assert!(!ctx.meta(first).unwrap().was_reloaded);
    assert!(ctx.is_cached(first));

    ctx.unpin(first).unwrap();
    assert!(ctx.is_alive(first));
}

#[test]
fn sqlite_shrinking_cache_evicts() {
    let mut ctx = context();
    let a = create(&mut ctx, "Manufacturer", &[("name", "A".into())]);
    let b = create(&mut ctx, "Manufacturer", &[("name", "B".into())]);
    let c = create(&mut ctx, "Manufacturer", &[("name", "C".into())]);
    ctx.set_max_cache(1);
    assert!(!ctx.is_cached(a));
    assert!(!ctx.is_cached(b));
    assert!(ctx.is_cached(c));
    assert_eq!(ctx.release_evicted(), 2);
    assert!(!ctx.is_alive(a));
    assert!(!ctx.is_alive(b));
}

#[test]
fn sqlite_recreated_row_is_not_reloaded() {
    let mut ctx = context_with(&Config::default().max_cache(1));
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    let golf_id = id_of(&ctx, golf);
    create(&mut ctx, "Car", &[("name", "Polo".into())]);
    assert!(!ctx.is_cached(golf));

    ctx.delete(golf).unwrap();
    let again = create(&mut ctx, "Car", &[("id", golf_id.clone()), ("name", "Golf II".into())]);
    assert_ne!(again, golf);

    let cars = ctx.objects("Car").unwrap();
    let found = cars.get(&mut ctx, Q::new("id", golf_id)).unwrap();
    assert_eq!(found, again);
    assert!(!ctx.meta(found).unwrap().was_reloaded);
    assert_eq!(text(&ctx, found, "name"), "Golf II");
}

#[test]
fn sqlite_changing_pk_to_live_key_fails() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    let polo = create(&mut ctx, "Car", &[("name", "Polo".into())]);
    let golf_id = id_of(&ctx, golf);

    let err = ctx.set_field(polo, "pk", golf_id.clone()).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicateIdentity));
    assert!(!ctx.pk(polo).unwrap().same_as(&golf_id));

    let err = ctx
        .instantiate("Car", [("id", golf_id), ("name", Value::from("Golf II"))])
        .unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicateIdentity));
}

fn file_context(path: &str, create_tables: bool) -> SqliteContext {
    let conn = SqliteConnection::open_file(path).unwrap();
    if create_tables {
        conn.execute_raw(support::DDL).unwrap();
    }
    heinzel::open(conn, &Config::default(), support::schemas()).unwrap()
}

#[test]
fn sqlite_requery_syncs_stale_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heinzel.db");
    let path = path.to_str().unwrap();

    let mut ours = file_context(path, true);
    let mut theirs = file_context(path, false);

    let vw = create(&mut ours, "Brand", &[("name", "VW".into())]);
    let vw_id = id_of(&ours, vw);
    let brands = ours.objects("Brand").unwrap();

    let remote = theirs
        .objects("Brand")
        .unwrap()
        .get(&mut theirs, Q::new("id", vw_id.clone()))
        .unwrap();
    theirs.set_field(remote, "name", "Volkswagen").unwrap();
    theirs.save(remote).unwrap();

    // Still the old value until the row is read again.
    assert_eq!(text(&ours, vw, "name"), "VW");
    assert_eq!(brands.get(&mut ours, Q::new("id", vw_id.clone())).unwrap(), vw);
    assert_eq!(text(&ours, vw, "name"), "Volkswagen");

    ours.set_force_sync(vw, false).unwrap();
    theirs.set_field(remote, "name", "VAG").unwrap();
    theirs.save(remote).unwrap();
    assert_eq!(brands.get(&mut ours, Q::new("id", vw_id)).unwrap(), vw);
    assert_eq!(text(&ours, vw, "name"), "Volkswagen");
}

#[derive(Default)]
struct Recorder {
    models: Vec<(String, &'static str)>,
    relations: Vec<(Phase, RelationAction, String)>,
}

struct Shared(Rc<RefCell<Recorder>>);

impl Observer for Shared {
    fn on_model_event(&mut self, model: &str, _instance: InstanceId, event: &ModelEvent) {
        self.0.borrow_mut().models.push((model.to_string(), event.name()));
    }

    fn on_relation_event(&mut self, event: &RelationEvent) {
        self.0
            .borrow_mut()
            .relations
            .push((event.phase, event.action, event.identifier.clone()));
    }
}

#[test]
fn sqlite_observers_see_lifecycle() {
    let mut ctx = context();
    let log = Rc::new(RefCell::new(Recorder::default()));
    ctx.observe(Box::new(Shared(Rc::clone(&log))));

    let bmw = create(&mut ctx, "Brand", &[("name", "BMW".into())]);
    ctx.set_field(bmw, "name", "BMW AG").unwrap();
    ctx.related(bmw, "cars").unwrap().all(&mut ctx).unwrap();

    let log = log.borrow();
    let names: Vec<&str> = log.models.iter().map(|(_, e)| *e).collect();
    assert_eq!(
        names,
        [
            "model-pre-init",
            "model-post-init",
            "model-pre-save",
            "model-post-save",
            "model-pre-update",
            "model-post-update",
            "model-pre-save",
            "model-post-save",
        ]
    );
    assert!(log.models.iter().all(|(m, _)| m == "Brand"));
    assert_eq!(
        log.relations,
        [
            (Phase::Pre, RelationAction::Get, "cars".to_string()),
            (Phase::Post, RelationAction::Get, "cars".to_string()),
        ]
    );
}
