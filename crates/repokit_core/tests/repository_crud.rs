mod common;

use common::{company, company_repo, ctx, setup_db, user, user_handlers, user_repo, User};
use repokit_core::model::{DescriptorError, FieldSet, Fields, Model};
use repokit_core::query::{
    delete_by, insert_return_order_by_id, select_by, select_deleted_also, select_order_asc,
    select_paginate, update_return_order_by_id,
};
use repokit_core::{
    Context, Database, ModelHandlers, PatchError, PatchOptions, Payload, RepoError, RepoOptions,
    Repository, Value,
};
use uuid::Uuid;

#[test]
fn create_on_nil_key_assigns_key_and_row_is_retrievable() {
    let db = setup_db();
    let repo = user_repo(&db);

    let created = repo.create(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();
    assert!(!created.id.is_nil());

    let loaded = repo.get_by_id(&ctx(), created.id, &[]).unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.audit.created_by, "system");
}

#[test]
fn create_keeps_caller_key() {
    let db = setup_db();
    let repo = user_repo(&db);
    let id = Uuid::new_v4();

    let created = repo
        .create(&ctx(), User { id, ..user("kay@x.io", "Kay") }, &[])
        .unwrap();
    assert_eq!(created.id, id);
}

#[test]
fn missing_rows_are_not_found() {
    let db = setup_db();
    let repo = user_repo(&db);

    let err = repo.get_by_id(&ctx(), Uuid::new_v4(), &[]).unwrap_err();
    assert!(err.is_not_found());

    let err = repo.get_by_identifier(&ctx(), "nobody@x.io", &[]).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn list_paginates_by_default_and_reports_unpaged_total() {
    let db = setup_db();
    let repo = user_repo(&db);
    for index in 0..30 {
        repo.create(&ctx(), user(&format!("u{index:02}@x.io"), "U"), &[])
            .unwrap();
    }

    let (page, total) = repo.list(&ctx(), &[]).unwrap();
    assert_eq!(page.len(), 25);
    assert_eq!(total, 30);

    let (tail, total) = repo
        .list(
            &ctx(),
            &[select_order_asc("email"), select_paginate(10, 25)],
        )
        .unwrap();
    assert_eq!(total, 30);
    assert_eq!(tail.len(), 5);
    assert_eq!(tail[0].email, "u25@x.io");

    repo.set_default_list_pagination(0, 0);
    let (all, _) = repo.list(&ctx(), &[]).unwrap();
    assert_eq!(all.len(), 30);
}

#[test]
fn count_applies_criteria() {
    let db = setup_db();
    let repo = user_repo(&db);
    repo.create(&ctx(), User { age: 20, ..user("a@x.io", "A") }, &[])
        .unwrap();
    repo.create(&ctx(), User { age: 40, ..user("b@x.io", "B") }, &[])
        .unwrap();

    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 2);
    assert_eq!(
        repo.count(&ctx(), &[select_by("age", ">", 30)]).unwrap(),
        1
    );
}

#[test]
fn update_returns_stored_row_and_requires_exactly_one_match() {
    let db = setup_db();
    let repo = user_repo(&db);
    let mut created = repo.create(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();

    created.name = "Ada L.".to_string();
    created.score = Some(9.5);
    let updated = repo.update(&ctx(), created.clone(), &[]).unwrap();
    assert_eq!(updated, created);

    let ghost = User {
        id: Uuid::new_v4(),
        ..user("ghost@x.io", "Ghost")
    };
    let err = repo.update(&ctx(), ghost, &[]).unwrap_err();
    assert!(err.is_expected_count_violation());
}

#[test]
fn create_many_restores_input_order_on_request() {
    let db = setup_db();
    let repo = user_repo(&db);
    let input = vec![
        user("c@x.io", "C"),
        user("a@x.io", "A"),
        user("b@x.io", "B"),
    ];

    let created = repo
        .create_many(&ctx(), input, &[insert_return_order_by_id()])
        .unwrap();
    let emails: Vec<&str> = created.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(emails, vec!["c@x.io", "a@x.io", "b@x.io"]);
    assert!(created.iter().all(|u| !u.id.is_nil()));
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 3);

    assert!(repo.create_many(&ctx(), Vec::new(), &[]).unwrap().is_empty());
}

#[test]
fn update_many_restores_input_order_on_request() {
    let db = setup_db();
    let repo = user_repo(&db);
    let created = repo
        .create_many(&ctx(), vec![user("a@x.io", "A"), user("b@x.io", "B")], &[])
        .unwrap();

    let mut changed: Vec<User> = created
        .into_iter()
        .rev()
        .map(|mut u| {
            u.age += 1;
            u
        })
        .collect();
    changed.push(User {
        id: Uuid::new_v4(),
        ..user("ghost@x.io", "Ghost")
    });

    // The unmatched record is dropped, so ordering falls back to store order.
    let updated = repo
        .update_many(&ctx(), changed.clone(), &[update_return_order_by_id()])
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|u| u.age == 31));

    changed.pop();
    let updated = repo
        .update_many(&ctx(), changed.clone(), &[update_return_order_by_id()])
        .unwrap();
    let ids: Vec<Uuid> = updated.iter().map(|u| u.id).collect();
    let expected: Vec<Uuid> = changed.iter().map(|u| u.id).collect();
    assert_eq!(ids, expected);
}

#[test]
fn upsert_updates_by_identifier_and_creates_when_absent() {
    let db = setup_db();
    let repo = user_repo(&db);

    let first = repo.upsert(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();
    let second = repo
        .upsert(&ctx(), user("ada@x.io", "Ada Lovelace"), &[])
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.name, "Ada Lovelace");
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 1);

    let many = repo
        .upsert_many(
            &ctx(),
            vec![user("ada@x.io", "Ada"), user("kay@x.io", "Kay")],
            &[],
        )
        .unwrap();
    assert_eq!(many[0].id, first.id);
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 2);
}

#[test]
fn get_or_create_twice_returns_the_same_row() {
    let db = setup_db();
    let repo = user_repo(&db);

    let first = repo.get_or_create(&ctx(), user("ada@x.io", "Ada")).unwrap();
    let second = repo
        .get_or_create(&ctx(), user("ada@x.io", "Someone else"))
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.name, "Ada");
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 1);
}

#[test]
fn identifier_lookup_follows_create_and_delete() {
    let db = setup_db();
    let repo = company_repo(&db);

    let created = repo.create(&ctx(), company("acme", "eu"), &[]).unwrap();
    let found = repo.get_by_identifier(&ctx(), "  acme ", &[]).unwrap();
    assert_eq!(found.id, created.id);

    repo.delete(&ctx(), &created).unwrap();
    let err = repo.get_by_identifier(&ctx(), "acme", &[]).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn email_identifier_lookup_sees_creates_and_soft_deletes() {
    let db = setup_db();
    let repo = user_repo(&db);

    let created = repo.create(&ctx(), user("x@example.com", "X"), &[]).unwrap();
    assert_eq!(
        repo.get_by_identifier(&ctx(), "x@example.com", &[]).unwrap().id,
        created.id
    );
    assert!(repo
        .get_by_identifier(&ctx(), "missing@example.com", &[])
        .unwrap_err()
        .is_not_found());

    repo.delete(&ctx(), &created).unwrap();
    assert!(repo
        .get_by_identifier(&ctx(), "x@example.com", &[])
        .unwrap_err()
        .is_not_found());
}

#[test]
fn identifier_resolver_tries_options_in_order() {
    let db = setup_db();
    let handlers = common::company_handlers().with_identifier_resolver(|identifier| {
        vec![
            repokit_core::IdentifierOption::new("slug", identifier),
            repokit_core::IdentifierOption::new("name", identifier.to_uppercase()),
        ]
    });
    let repo = Repository::try_new(db.clone(), handlers, RepoOptions::default()).unwrap();
    let created = repo
        .create(
            &ctx(),
            common::Company {
                name: "GLOBEX".to_string(),
                ..company("gx", "us")
            },
            &[],
        )
        .unwrap();

    let by_name = repo.get_by_identifier(&ctx(), "globex", &[]).unwrap();
    assert_eq!(by_name.id, created.id);
}

#[test]
fn soft_delete_hides_rows_and_force_delete_removes_them() {
    let db = setup_db();
    let repo = user_repo(&db);
    let created = repo.create(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();

    repo.delete(&ctx(), &created).unwrap();
    assert!(repo.get_by_id(&ctx(), created.id, &[]).unwrap_err().is_not_found());

    let tombstone = repo
        .get_by_id(&ctx(), created.id, &[select_deleted_also()])
        .unwrap();
    assert!(tombstone.deleted_at.is_some());

    repo.force_delete(&ctx(), &created).unwrap();
    assert_eq!(repo.count(&ctx(), &[select_deleted_also()]).unwrap(), 0);
}

#[test]
fn delete_where_requires_a_predicate_unless_allowed() {
    let db = setup_db();
    let repo = company_repo(&db);
    repo.create(&ctx(), company("a", "eu"), &[]).unwrap();
    repo.create(&ctx(), company("b", "us"), &[]).unwrap();
    repo.create(&ctx(), company("c", "us"), &[]).unwrap();

    let err = repo.delete_where(&ctx(), &[]).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));

    let removed = repo
        .delete_many(&ctx(), &[delete_by("region", "=", "us")])
        .unwrap();
    assert_eq!(removed, 2);

    let permissive = Repository::try_new(
        db.clone(),
        common::company_handlers(),
        RepoOptions::default().allow_full_table_delete(true),
    )
    .unwrap();
    assert_eq!(permissive.delete_where(&ctx(), &[]).unwrap(), 1);
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 0);
}

#[test]
fn raw_sql_decodes_rows() {
    let db = setup_db();
    let repo = company_repo(&db);
    repo.create(&ctx(), company("a", "eu"), &[]).unwrap();
    repo.create(&ctx(), company("b", "us"), &[]).unwrap();

    let rows = repo
        .raw(
            &ctx(),
            "SELECT * FROM companies WHERE region = ? ORDER BY slug",
            &[Value::from("us")],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slug, "b");
}

#[test]
fn patch_by_id_writes_only_touched_columns() {
    let db = setup_db();
    let repo = user_repo(&db);
    let created = repo.create(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();

    // A concurrent change to a column the patch does not touch survives.
    db.execute_batch(&format!(
        "UPDATE users SET age = 99 WHERE id = '{}'",
        created.id
    ))
    .unwrap();

    let payload: Payload = [("name".to_string(), Value::from("Countess"))]
        .into_iter()
        .collect();
    let patched = repo
        .patch_by_id(&ctx(), created.id, &payload, &PatchOptions::default(), &[])
        .unwrap();
    assert_eq!(patched.name, "Countess");
    assert_eq!(patched.age, 99);

    let unchanged = repo
        .patch_by_id(&ctx(), created.id, &Payload::new(), &PatchOptions::default(), &[])
        .unwrap();
    assert_eq!(unchanged, patched);

    let key_change: Payload = [("id".to_string(), Value::from(Uuid::new_v4()))]
        .into_iter()
        .collect();
    let err = repo
        .patch_by_id(&ctx(), created.id, &key_change, &PatchOptions::default(), &[])
        .unwrap_err();
    assert!(matches!(err, RepoError::Patch(PatchError::PrimaryKeyDenied(_))));
}

#[test]
fn cancelled_context_fails_before_touching_the_store() {
    let db = setup_db();
    let repo = user_repo(&db);
    let (cancellable, handle) = Context::background().with_cancel();
    handle.cancel();

    let err = repo
        .create(&cancellable, user("ada@x.io", "Ada"), &[])
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_retryable());
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 0);
}

#[test]
fn transaction_rolls_back_on_duplicate() {
    let db = setup_db();
    let repo = user_repo(&db);

    let result = db.run_in_tx(|tx| {
        repo.create_tx(&ctx(), tx, user("ada@x.io", "Ada"), &[])?;
        repo.create_tx(&ctx(), tx, user("ada@x.io", "Ada again"), &[])?;
        Ok::<_, RepoError>(())
    });

    let err = result.unwrap_err();
    assert!(err.is_duplicate());
    assert!(err.is_constraint_violation());
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 0);
}

#[test]
fn undecodable_rows_are_reported_as_invalid_data() {
    let db = setup_db();
    let repo = user_repo(&db);
    db.execute_batch(&format!(
        "INSERT INTO users (id, email, name, tenant_id, age, created_by)
         VALUES ('{}', 'bad@x.io', 'Bad', 'acme', 'not a number', 'system')",
        Uuid::new_v4()
    ))
    .unwrap();

    let err = repo.list(&ctx(), &[]).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData { column, .. } if column == "age"));
}

#[derive(Debug, Clone, Default)]
struct Keyless {
    label: String,
}

impl Fields for Keyless {
    fn describe(fields: &mut FieldSet<Self>) {
        fields.field("label", |k| &k.label, |k| &mut k.label);
    }
}

impl Model for Keyless {
    fn table_name() -> &'static str {
        "keyless"
    }
}

#[test]
fn construction_rejects_invalid_configuration() {
    let db = Database::open_in_memory().unwrap();

    let handlers = ModelHandlers::new(Keyless::default, |_: &Keyless| Uuid::nil(), |_, _| {});
    let err = Repository::try_new(db.clone(), handlers, RepoOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Descriptor(DescriptorError::MissingPrimaryKey { .. })
    ));

    let half = ModelHandlers::new(User::default, |u: &User| u.id, |u: &mut User, id| u.id = id)
        .with_identifier_value(|u: &User| u.email.clone());
    let err = Repository::try_new(db, half, RepoOptions::default()).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[test]
fn model_meta_describes_storage_columns() {
    let db = setup_db();
    let repo = Repository::try_new(db, user_handlers(), RepoOptions::default()).unwrap();
    let meta = repo.model_meta();

    assert_eq!(meta.table_name, "users");
    assert!(meta.field("created_by").is_some());
    assert!(meta.field("deleted_at").is_some());
}
