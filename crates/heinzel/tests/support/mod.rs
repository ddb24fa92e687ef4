//! Shared fixtures for the SQLite integration tests.

#![allow(dead_code)]

use heinzel::prelude::*;

pub const DDL: &str = "
CREATE TABLE manufacturers (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE brands (id INTEGER PRIMARY KEY, name TEXT UNIQUE, manufacturer_id INTEGER);
CREATE TABLE cars (id INTEGER PRIMARY KEY, name TEXT, year INTEGER, brand_id INTEGER);
CREATE TABLE keys (id INTEGER PRIMARY KEY, serial TEXT, car_id INTEGER);
CREATE TABLE drivers (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE m2m__drivers__cars__cars (id INTEGER PRIMARY KEY, cars_id INTEGER, drivers_id INTEGER);
CREATE TABLE actors (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE movies (id INTEGER PRIMARY KEY, title TEXT);
CREATE TABLE m2m__actors__acted_in__movies (id INTEGER PRIMARY KEY, acted_in_id INTEGER, actors_id INTEGER);
CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT);
CREATE TABLE isbns (id INTEGER PRIMARY KEY, code TEXT);
CREATE TABLE o2o__books__isbn__isbns (id INTEGER PRIMARY KEY, isbn_id INTEGER UNIQUE, book_id INTEGER UNIQUE);
";

/// Manufacturer <- Brand <- Car <- Key, Driver <-> Car, Actor <-> Movie,
/// Book - Isbn.
pub fn schemas() -> Vec<ModelSchema> {
    vec![
        ModelSchema::builder("Manufacturer")
            .field(FieldInfo::text("name"))
            .build()
            .unwrap(),
        ModelSchema::builder("Brand")
            .field(FieldInfo::text("name").unique().max_length(40))
            .relation(
                RelationField::foreign_key("manufacturer", "Manufacturer")
                    .related_name("brands")
                    .on_delete(ReferentialAction::SetNull),
            )
            .build()
            .unwrap(),
        ModelSchema::builder("Car")
            .field(FieldInfo::text("name"))
            .field(FieldInfo::integer("year"))
            .relation(RelationField::foreign_key("brand", "Brand").related_name("cars"))
            .build()
            .unwrap(),
        ModelSchema::builder("Key")
            .field(FieldInfo::text("serial"))
            .relation(
                RelationField::foreign_key("car", "Car")
                    .related_name("keys")
                    .on_delete(ReferentialAction::Restrict),
            )
            .build()
            .unwrap(),
        ModelSchema::builder("Driver")
            .field(FieldInfo::text("name"))
            .relation(RelationField::many_to_many("cars", "Car").related_name("drivers"))
            .build()
            .unwrap(),
        ModelSchema::builder("Actor")
            .field(FieldInfo::text("name"))
            .relation(RelationField::many_to_many("acted_in", "Movie").related_name("actors"))
            .build()
            .unwrap(),
        ModelSchema::builder("Movie")
            .field(FieldInfo::text("title"))
            .build()
            .unwrap(),
        ModelSchema::builder("Book")
            .field(FieldInfo::text("title"))
            .relation(RelationField::one_to_one("isbn", "Isbn").related_name("book"))
            .build()
            .unwrap(),
        ModelSchema::builder("Isbn")
            .field(FieldInfo::text("code"))
            .build()
            .unwrap(),
    ]
}

pub fn context() -> SqliteContext {
    context_with(&Config::default())
}

pub fn context_with(config: &Config) -> SqliteContext {
    let conn = SqliteConnection::open_memory().unwrap();
    conn.execute_raw(DDL).unwrap();
    heinzel::open(conn, config, schemas()).unwrap()
}

/// Create and save one instance.
pub fn create(ctx: &mut SqliteContext, model: &str, values: &[(&str, Value)]) -> InstanceId {
    ctx.objects(model)
        .unwrap()
        .create(ctx, values.iter().map(|(n, v)| (*n, v.clone())))
        .unwrap()
}

/// Row id of a saved instance.
pub fn id_of(ctx: &SqliteContext, instance: InstanceId) -> Value {
    ctx.get_field(instance, "id").unwrap()
}

pub fn text(ctx: &SqliteContext, instance: InstanceId, field: &str) -> String {
    ctx.get_field(instance, field)
        .unwrap()
        .as_str()
        .unwrap()
        .to_string()
}

pub fn names(ctx: &SqliteContext, instances: &[InstanceId], field: &str) -> Vec<String> {
    instances.iter().map(|i| text(ctx, *i, field)).collect()
}
