#![allow(dead_code)]

use chrono::{DateTime, Utc};
use repokit_core::{
    Context, Database, FieldSet, Fields, Model, ModelHandlers, RepoOptions, Repository,
};
use std::path::Path;
use uuid::Uuid;

pub const SCHEMA: &str = "
CREATE TABLE users (
    id TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    age INTEGER NOT NULL,
    score REAL,
    deleted_at TEXT,
    created_by TEXT NOT NULL,
    updated_by TEXT
);
CREATE TABLE companies (
    id TEXT PRIMARY KEY NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    region TEXT NOT NULL
);
";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audit {
    pub created_by: String,
    pub updated_by: Option<String>,
}

impl Fields for Audit {
    fn describe(fields: &mut FieldSet<Self>) {
        fields.field("created_by", |a| &a.created_by, |a| &mut a.created_by);
        fields.field("updated_by", |a| &a.updated_by, |a| &mut a.updated_by);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub tenant_id: String,
    pub age: i32,
    pub score: Option<f64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub audit: Audit,
}

impl Fields for User {
    fn describe(fields: &mut FieldSet<Self>) {
        fields.primary_key("id", |u| &u.id, |u| &mut u.id);
        fields.field("email", |u| &u.email, |u| &mut u.email).unique();
        fields.field("name", |u| &u.name, |u| &mut u.name).external("displayName");
        fields
            .field("tenant_id", |u| &u.tenant_id, |u| &mut u.tenant_id)
            .external("tenantId");
        fields.field("age", |u| &u.age, |u| &mut u.age);
        fields.field("score", |u| &u.score, |u| &mut u.score);
        fields
            .field("deleted_at", |u| &u.deleted_at, |u| &mut u.deleted_at)
            .soft_delete()
            .skip_external();
        fields.embed(|u| &u.audit, |u| &mut u.audit);
    }
}

impl Model for User {
    fn table_name() -> &'static str {
        "users"
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Company {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub region: String,
}

impl Fields for Company {
    fn describe(fields: &mut FieldSet<Self>) {
        fields.primary_key("id", |c| &c.id, |c| &mut c.id);
        fields.field("slug", |c| &c.slug, |c| &mut c.slug).unique();
        fields.field("name", |c| &c.name, |c| &mut c.name);
        fields.field("region", |c| &c.region, |c| &mut c.region);
    }
}

impl Model for Company {
    fn table_name() -> &'static str {
        "companies"
    }
}

pub fn ctx() -> Context {
    Context::background()
}

pub fn setup_db() -> Database {
    let db = Database::open_in_memory().expect("in-memory db");
    db.execute_batch(SCHEMA).expect("schema");
    db
}

/// Schema applied to a file database shared by several connections.
pub fn setup_file_db(path: &Path) -> Database {
    let db = Database::open(path).expect("file db");
    db.execute_batch(SCHEMA).expect("schema");
    db
}

pub fn user_handlers() -> ModelHandlers<User> {
    ModelHandlers::new(User::default, |u: &User| u.id, |u: &mut User, id| u.id = id)
        .with_identifier("email", |u: &User| u.email.clone())
}

pub fn company_handlers() -> ModelHandlers<Company> {
    ModelHandlers::new(
        Company::default,
        |c: &Company| c.id,
        |c: &mut Company, id| c.id = id,
    )
    .with_identifier("slug", |c: &Company| c.slug.clone())
}

pub fn user_repo(db: &Database) -> Repository<User> {
    Repository::try_new(db.clone(), user_handlers(), RepoOptions::default()).expect("user repo")
}

pub fn company_repo(db: &Database) -> Repository<Company> {
    Repository::try_new(db.clone(), company_handlers(), RepoOptions::default())
        .expect("company repo")
}

pub fn user(email: &str, name: &str) -> User {
    User {
        email: email.to_string(),
        name: name.to_string(),
        tenant_id: "acme".to_string(),
        age: 30,
        audit: Audit {
            created_by: "system".to_string(),
            updated_by: None,
        },
        ..User::default()
    }
}

pub fn company(slug: &str, region: &str) -> Company {
    Company {
        slug: slug.to_string(),
        name: slug.to_uppercase(),
        region: region.to_string(),
        ..Company::default()
    }
}
