mod support;

use heinzel::RelationMode;
use heinzel::prelude::*;
use support::{context, context_with, create, id_of, names};

fn movie(ctx: &mut SqliteContext, title: &str) -> InstanceId {
    create(ctx, "Movie", &[("title", title.into())])
}

#[test]
fn sqlite_many_to_many_remove() {
    let mut ctx = context();
    let actor = create(&mut ctx, "Actor", &[("name", "Bruno Ganz".into())]);
    let a = movie(&mut ctx, "A");
    let b = movie(&mut ctx, "B");
    let c = movie(&mut ctx, "C");

    let acted_in = ctx.related(actor, "acted_in").unwrap();
    assert!(!acted_in.is_single());
    assert_eq!(acted_in.target(), "Movie");
    acted_in.add(&mut ctx, &[a, b, c]).unwrap();
    // Already linked; no duplicate rows.
    acted_in.add(&mut ctx, &[a]).unwrap();

    acted_in.remove(&mut ctx, &[b]).unwrap();
    let movies = acted_in.all(&mut ctx).unwrap();
    assert_eq!(names(&ctx, &movies, "title"), ["A", "C"]);

    let actors = ctx.related(a, "actors").unwrap();
    assert_eq!(actors.all(&mut ctx).unwrap(), [actor]);
    assert!(ctx.related(b, "actors").unwrap().all(&mut ctx).unwrap().is_empty());

    acted_in.set(&mut ctx, &[b]).unwrap();
    assert_eq!(acted_in.all(&mut ctx).unwrap(), [b]);
    acted_in.delete(&mut ctx).unwrap();
    assert!(acted_in.all(&mut ctx).unwrap().is_empty());
    assert_eq!(ctx.objects("Movie").unwrap().count(&mut ctx).unwrap(), 3);
}

#[test]
fn sqlite_many_to_many_from_reverse_side() {
    let mut ctx = context();
    let heat = movie(&mut ctx, "Heat");
    let pacino = create(&mut ctx, "Actor", &[("name", "Pacino".into())]);
    let de_niro = create(&mut ctx, "Actor", &[("name", "De Niro".into())]);

    ctx.related(heat, "actors").unwrap().add(&mut ctx, &[pacino, de_niro]).unwrap();
    let films = ctx.related(de_niro, "acted_in").unwrap().all(&mut ctx).unwrap();
    assert_eq!(films, [heat]);

    let actors = ctx.objects("Actor").unwrap();
    let found = actors
        .filter(Q::new("acted_in__title", "Heat"))
        .unwrap()
        .order_by(&["name"])
        .unwrap()
        .eval(&mut ctx)
        .unwrap();
    assert_eq!(found, [de_niro, pacino]);
}

#[test]
fn sqlite_one_to_one_steals_target() {
    let mut ctx = context();
    let first = create(&mut ctx, "Book", &[("title", "Momo".into())]);
    let second = create(&mut ctx, "Book", &[("title", "Jim Knopf".into())]);
    let isbn = create(&mut ctx, "Isbn", &[("code", "978-3-522".into())]);

    let first_isbn = ctx.related(first, "isbn").unwrap();
    let second_isbn = ctx.related(second, "isbn").unwrap();
    assert!(first_isbn.is_single());

    first_isbn.set(&mut ctx, &[isbn]).unwrap();
    assert_eq!(first_isbn.get(&mut ctx).unwrap(), Some(isbn));

    second_isbn.add(&mut ctx, &[isbn]).unwrap();
    assert_eq!(first_isbn.get(&mut ctx).unwrap(), None);
    assert_eq!(second_isbn.get(&mut ctx).unwrap(), Some(isbn));
    assert_eq!(ctx.related(isbn, "book").unwrap().get(&mut ctx).unwrap(), Some(second));

    let err = second_isbn.remove(&mut ctx, &[isbn]).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Unsupported));

    second_isbn.delete(&mut ctx).unwrap();
    assert_eq!(second_isbn.get(&mut ctx).unwrap(), None);
}

#[test]
fn sqlite_reverse_foreign_key_manager() {
    let mut ctx = context();
    let bmw = create(&mut ctx, "Brand", &[("name", "BMW".into())]);
    let three = create(&mut ctx, "Car", &[("name", "3er".into())]);
    let five = create(&mut ctx, "Car", &[("name", "5er".into())]);
    let seven = create(&mut ctx, "Car", &[("name", "7er".into())]);
    let bmw_id = id_of(&ctx, bmw);

    let cars = ctx.related(bmw, "cars").unwrap();
    assert_eq!(cars.mode(), RelationMode::ForeignKey);
    cars.add(&mut ctx, &[three, five]).unwrap();
    assert_eq!(ctx.get_field(three, "brand").unwrap(), bmw_id);
    assert!(!ctx.is_dirty(three));
    assert_eq!(cars.all(&mut ctx).unwrap(), [three, five]);

    cars.remove(&mut ctx, &[three]).unwrap();
    assert_eq!(ctx.get_field(three, "brand").unwrap(), Value::Null);
    assert_eq!(cars.all(&mut ctx).unwrap(), [five]);

    cars.set(&mut ctx, &[seven]).unwrap();
    assert_eq!(ctx.get_field(five, "brand").unwrap(), Value::Null);
    assert_eq!(cars.all(&mut ctx).unwrap(), [seven]);

    cars.delete(&mut ctx).unwrap();
    assert!(cars.all(&mut ctx).unwrap().is_empty());
    assert_eq!(ctx.objects("Car").unwrap().count(&mut ctx).unwrap(), 3);

    let err = cars.get(&mut ctx).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Cardinality));
}

#[test]
fn sqlite_forward_foreign_key_manager() {
    let mut ctx = context();
    let vw = create(&mut ctx, "Brand", &[("name", "VW".into())]);
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);

    let brand = ctx.related(golf, "brand").unwrap();
    assert!(brand.is_single());
    assert_eq!(brand.get(&mut ctx).unwrap(), None);

    brand.set(&mut ctx, &[vw]).unwrap();
    assert_eq!(brand.get(&mut ctx).unwrap(), Some(vw));
    assert_eq!(ctx.get_field(golf, "brand").unwrap(), id_of(&ctx, vw));
    assert_eq!(ctx.related(vw, "cars").unwrap().all(&mut ctx).unwrap(), [golf]);

    brand.delete(&mut ctx).unwrap();
    assert_eq!(brand.get(&mut ctx).unwrap(), None);
    assert_eq!(ctx.objects("Brand").unwrap().count(&mut ctx).unwrap(), 1);
}

#[test]
fn sqlite_relation_argument_errors() {
    let mut ctx = context();
    let actor = create(&mut ctx, "Actor", &[("name", "Ganz".into())]);
    let car = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    let vw = create(&mut ctx, "Brand", &[("name", "VW".into())]);
    let bmw = create(&mut ctx, "Brand", &[("name", "BMW".into())]);

    let acted_in = ctx.related(actor, "acted_in").unwrap();
    let err = acted_in.add(&mut ctx, &[car]).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::WrongModel));
    assert!(err.to_string().contains("need an instance of Movie, got Car"));

    let draft = ctx.instantiate("Movie", [("title", Value::from("Draft"))]).unwrap();
    let err = acted_in.add(&mut ctx, &[draft]).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Unsaved));

    let err = acted_in.get(&mut ctx).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Cardinality));

    let err = ctx.related(car, "brand").unwrap().set(&mut ctx, &[vw, bmw]).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Cardinality));

    let err = ctx.related(car, "wheels").unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownName));

    let newcomer = ctx.instantiate("Actor", [("name", Value::from("Newcomer"))]).unwrap();
    let err = ctx.related(newcomer, "acted_in").unwrap().all(&mut ctx).unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::Unsaved));
}

#[test]
fn sqlite_delete_cascades_to_referencing_rows() {
    let mut ctx = context();
    let vw = create(&mut ctx, "Brand", &[("name", "VW".into())]);
    let vw_id = id_of(&ctx, vw);
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into()), ("brand", vw_id.clone())]);
    create(&mut ctx, "Car", &[("name", "Polo".into()), ("brand", vw_id)]);
    let trabant = create(&mut ctx, "Car", &[("name", "Trabant".into())]);

    ctx.delete(vw).unwrap();
    let cars = ctx.objects("Car").unwrap();
    let left = cars.all().eval(&mut ctx).unwrap();
    assert_eq!(left, [trabant]);
    assert!(!ctx.is_alive(golf));
}

#[test]
fn sqlite_delete_sets_null() {
    let mut ctx = context();
    let vag = create(&mut ctx, "Manufacturer", &[("name", "VAG".into())]);
    let vag_id = id_of(&ctx, vag);
    let vw = create(&mut ctx, "Brand", &[("name", "VW".into()), ("manufacturer", vag_id)]);

    ctx.delete(vag).unwrap();
    assert_eq!(ctx.get_field(vw, "manufacturer").unwrap(), Value::Null);
    assert!(!ctx.is_dirty(vw));

    let rows = ctx.objects("Brand").unwrap().all().as_dicts(&mut ctx).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("manufacturer_id"), Some(&Value::Null));
}

#[test]
fn sqlite_delete_restricted_by_references() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    let golf_id = id_of(&ctx, golf);
    let key = create(&mut ctx, "Key", &[("serial", "K-1".into()), ("car", golf_id)]);

    let err = ctx.delete(golf).unwrap_err();
    assert!(err.is_sanity());
    assert!(ctx.is_alive(golf));
    assert_eq!(ctx.objects("Car").unwrap().count(&mut ctx).unwrap(), 1);

    // Still tracked after the refused delete.
    ctx.set_field(golf, "year", 1974).unwrap();
    assert!(ctx.is_dirty(golf));

    ctx.delete(key).unwrap();
    ctx.delete(golf).unwrap();
    assert_eq!(ctx.objects("Car").unwrap().count(&mut ctx).unwrap(), 0);
}

#[test]
fn sqlite_delete_removes_link_rows() {
    let mut ctx = context();
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into())]);
    let polo = create(&mut ctx, "Car", &[("name", "Polo".into())]);
    let driver = create(&mut ctx, "Driver", &[("name", "Niki".into())]);
    ctx.related(driver, "cars").unwrap().set(&mut ctx, &[golf, polo]).unwrap();

    ctx.delete(golf).unwrap();
    let driven = ctx.related(driver, "cars").unwrap().all(&mut ctx).unwrap();
    assert_eq!(driven, [polo]);

    ctx.delete(driver).unwrap();
    assert!(ctx.related(polo, "drivers").unwrap().all(&mut ctx).unwrap().is_empty());
    let links = ctx
        .store()
        .query("SELECT COUNT(*) FROM m2m__drivers__cars__cars", &[])
        .unwrap();
    assert_eq!(links[0].get(0).and_then(Value::as_i64), Some(0));
}

#[test]
fn sqlite_cascade_larger_than_cache() {
    let mut ctx = context_with(&Config::default().max_cache(2));
    let bmw = create(&mut ctx, "Brand", &[("name", "BMW".into())]);
    let bmw_id = id_of(&ctx, bmw);
    for name in ["1er", "3er", "5er", "7er"] {
        create(&mut ctx, "Car", &[("name", name.into()), ("brand", bmw_id.clone())]);
    }

    ctx.delete(bmw).unwrap();
    assert_eq!(ctx.objects("Car").unwrap().count(&mut ctx).unwrap(), 0);
    assert_eq!(ctx.objects("Brand").unwrap().count(&mut ctx).unwrap(), 0);
    assert!(ctx.pk(bmw).unwrap().is_null());
}

#[test]
fn sqlite_failed_delete_rolls_back_cascade() {
    let mut ctx = context();
    let vw = create(&mut ctx, "Brand", &[("name", "VW".into())]);
    let vw_id = id_of(&ctx, vw);
    let golf = create(&mut ctx, "Car", &[("name", "Golf".into()), ("brand", vw_id.clone())]);
    ctx.store()
        .execute_raw("CREATE TRIGGER keep_brands BEFORE DELETE ON brands BEGIN SELECT RAISE(ABORT, 'brands are kept'); END")
        .unwrap();

    assert!(ctx.delete(vw).is_err());
    create(&mut ctx, "Car", &[("name", "Polo".into())]);

    // The cascaded car is back and both instances are untouched.
    assert_eq!(ctx.objects("Car").unwrap().count(&mut ctx).unwrap(), 2);
    assert!(ctx.is_alive(golf));
    assert_eq!(ctx.get_field(golf, "brand").unwrap(), vw_id);
    ctx.set_field(vw, "name", "Volkswagen").unwrap();
    assert!(ctx.is_dirty(vw));
    ctx.set_field(golf, "year", 1974).unwrap();
    assert!(ctx.is_dirty(golf));
}

#[test]
fn sqlite_failed_delete_keeps_nulled_references() {
    let mut ctx = context();
    let vag = create(&mut ctx, "Manufacturer", &[("name", "VAG".into())]);
    let vag_id = id_of(&ctx, vag);
    let vw = create(&mut ctx, "Brand", &[("name", "VW".into()), ("manufacturer", vag_id.clone())]);
    ctx.store()
        .execute_raw(
            "CREATE TRIGGER keep_manufacturers BEFORE DELETE ON manufacturers \
             BEGIN SELECT RAISE(ABORT, 'manufacturers are kept'); END",
        )
        .unwrap();

    assert!(ctx.delete(vag).is_err());
    create(&mut ctx, "Brand", &[("name", "Seat".into())]);

    assert_eq!(ctx.get_field(vw, "manufacturer").unwrap(), vag_id);
    let rows = ctx
        .objects("Brand")
        .unwrap()
        .filter(Q::new("name", "VW"))
        .unwrap()
        .as_dicts(&mut ctx)
        .unwrap();
    assert_eq!(rows[0].get_by_name("manufacturer_id"), Some(&vag_id));
    assert!(!ctx.pk(vag).unwrap().is_null());
}

#[test]
fn sqlite_failed_set_keeps_old_links() {
    let mut ctx = context();
    let actor = create(&mut ctx, "Actor", &[("name", "Bruno Ganz".into())]);
    let a = movie(&mut ctx, "A");
    let b = movie(&mut ctx, "B");
    let acted_in = ctx.related(actor, "acted_in").unwrap();
    acted_in.add(&mut ctx, &[a]).unwrap();

    ctx.store()
        .execute_raw(&format!(
            "CREATE TRIGGER no_b BEFORE INSERT ON m2m__actors__acted_in__movies \
             WHEN NEW.acted_in_id = {} BEGIN SELECT RAISE(ABORT, 'no B'); END",
            id_of(&ctx, b).as_i64().unwrap()
        ))
        .unwrap();

    assert!(acted_in.set(&mut ctx, &[b]).is_err());
    movie(&mut ctx, "C");
    assert_eq!(acted_in.all(&mut ctx).unwrap(), [a]);
}
