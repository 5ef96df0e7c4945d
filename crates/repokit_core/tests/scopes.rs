mod common;

use common::{setup_db, user, user_repo, User};
use repokit_core::query::{delete_by, select_by};
use repokit_core::scope::scope_by_field;
use repokit_core::{
    Context, RepoError, ScopeDefaults, ScopeDefinition, ScopeOperation, ScopeRegistry,
};

fn tenant(name: &str) -> Context {
    Context::background().with_scope_data("tenant", name.to_string())
}

fn tenant_repo(db: &repokit_core::Database) -> repokit_core::Repository<User> {
    let repo = user_repo(db);
    repo.register_scope("tenant", scope_by_field::<String>("tenant", "tenant_id"));
    repo.set_scope_defaults(ScopeDefaults {
        all: vec!["tenant".to_string()],
        ..ScopeDefaults::default()
    })
    .unwrap();
    repo
}

#[test]
fn insert_scope_stamps_the_tenant_column() {
    let db = setup_db();
    let repo = tenant_repo(&db);

    let created = repo
        .create(
            &tenant("globex"),
            User {
                tenant_id: String::new(),
                ..user("ada@x.io", "Ada")
            },
            &[],
        )
        .unwrap();
    assert_eq!(created.tenant_id, "globex");
}

#[test]
fn reads_are_confined_to_the_context_tenant() {
    let db = setup_db();
    let repo = tenant_repo(&db);
    repo.create(&tenant("acme"), user("a@x.io", "A"), &[]).unwrap();
    repo.create(&tenant("acme"), user("b@x.io", "B"), &[]).unwrap();
    repo.create(&tenant("globex"), user("c@x.io", "C"), &[]).unwrap();

    let (acme, total) = repo.list(&tenant("acme"), &[]).unwrap();
    assert_eq!(total, 2);
    assert!(acme.iter().all(|u| u.tenant_id == "acme"));

    assert_eq!(repo.count(&tenant("globex"), &[]).unwrap(), 1);
    assert_eq!(repo.count(&Context::background(), &[]).unwrap(), 0);

    let everyone = Context::background().without_default_scopes();
    assert_eq!(repo.count(&everyone, &[]).unwrap(), 3);
}

#[test]
fn scope_criteria_combine_with_caller_criteria() {
    let db = setup_db();
    let repo = tenant_repo(&db);
    repo.create(&tenant("acme"), user("a@x.io", "A"), &[]).unwrap();
    repo.create(&tenant("globex"), user("b@x.io", "A"), &[]).unwrap();

    let found = repo
        .get(&tenant("globex"), &[select_by("name", "=", "A")])
        .unwrap();
    assert_eq!(found.email, "b@x.io");
}

#[test]
fn update_narrowed_to_zero_rows_by_scope_is_a_count_violation() {
    let db = setup_db();
    let repo = tenant_repo(&db);
    let mut created = repo.create(&tenant("acme"), user("a@x.io", "A"), &[]).unwrap();

    created.name = "Hijacked".to_string();
    let err = repo.update(&tenant("globex"), created.clone(), &[]).unwrap_err();
    assert!(err.is_expected_count_violation());

    let stored = repo.get_by_id(&tenant("acme"), created.id, &[]).unwrap();
    assert_eq!(stored.name, "A");
}

#[test]
fn delete_scope_protects_other_tenants() {
    let db = setup_db();
    let repo = tenant_repo(&db);
    repo.create(&tenant("acme"), user("a@x.io", "A"), &[]).unwrap();

    let removed = repo
        .delete_where(&tenant("globex"), &[delete_by("email", "=", "a@x.io")])
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(repo.count(&tenant("acme"), &[]).unwrap(), 1);
}

#[test]
fn scope_predicates_satisfy_the_full_table_delete_guard() {
    let db = setup_db();
    let repo = tenant_repo(&db);
    repo.create(&tenant("acme"), user("a@x.io", "A"), &[]).unwrap();
    repo.create(&tenant("globex"), user("b@x.io", "B"), &[]).unwrap();

    assert_eq!(repo.delete_where(&tenant("acme"), &[]).unwrap(), 1);

    let unscoped = Context::background().without_default_scopes();
    let err = repo.delete_where(&unscoped, &[]).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[test]
fn per_call_scopes_apply_only_to_their_operation() {
    let db = setup_db();
    let repo = user_repo(&db);
    repo.register_scope(
        "adults",
        ScopeDefinition::new().on_select(|_| vec![select_by("age", ">=", 18)]),
    );
    repo.create(&Context::background(), common::User { age: 12, ..user("kid@x.io", "Kid") }, &[])
        .unwrap();
    repo.create(&Context::background(), user("ada@x.io", "Ada"), &[])
        .unwrap();

    let adults = Context::background().with_select_scopes(["adults"]);
    assert_eq!(repo.count(&adults, &[]).unwrap(), 1);

    let only_updates = Context::background().with_update_scopes(["adults"]);
    assert_eq!(repo.count(&only_updates, &[]).unwrap(), 2);

    let unknown = Context::background().with_scopes(["missing"]);
    assert_eq!(repo.count(&unknown, &[]).unwrap(), 2);
}

#[test]
fn unknown_default_scopes_are_rejected_without_changing_defaults() {
    let db = setup_db();
    let repo = tenant_repo(&db);

    let err = repo
        .set_scope_defaults(ScopeDefaults {
            select: vec!["ghost".to_string()],
            ..ScopeDefaults::default()
        })
        .unwrap_err();
    match err {
        RepoError::Validation(validation) => {
            assert_eq!(validation.fields.len(), 1);
            assert!(validation.fields[0].message.contains("ghost"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(repo.scope_defaults().all, vec!["tenant".to_string()]);
}

#[test]
fn resolution_is_deterministic_without_duplicates() {
    let registry = ScopeRegistry::new();
    registry.register("a", ScopeDefinition::new());
    registry.register("b", ScopeDefinition::new());
    registry
        .set_defaults(ScopeDefaults {
            select: vec!["a".to_string()],
            ..ScopeDefaults::default()
        })
        .unwrap();
    let ctx = Context::background().with_select_scopes(["b", "a"]);

    for _ in 0..16 {
        let state = registry.resolve_state(&ctx, ScopeOperation::Select);
        assert_eq!(state.names, vec!["a", "b"]);
    }
    let insert = registry.resolve_state(&ctx, ScopeOperation::Insert);
    assert!(insert.names.is_empty());
}
