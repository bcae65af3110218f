use rusqlite::Connection;
use specboard_core::{
    open_db_in_memory, AuthError, BulletItem, CoreError, CoreRuntime, EntityRef, Project,
    RequestScope, Specification, StaticIdentityVerifier, ValidationError, VerifiedIdentity,
};
use uuid::Uuid;

struct World {
    conn: Connection,
    runtime: CoreRuntime,
    owner: RequestScope,
    intruder: RequestScope,
    project: Project,
    spec: Specification,
    item: BulletItem,
}

fn identity(email: &str) -> VerifiedIdentity {
    VerifiedIdentity {
        user_id: Uuid::new_v4(),
        email: email.to_string(),
        display_name: "User".to_string(),
    }
}

fn world() -> World {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let verifier = StaticIdentityVerifier::new()
        .with_identity("owner-token", identity("owner@example.com"))
        .with_identity("intruder-token", identity("intruder@example.com"));

    let (owner, intruder, project, spec, item) = {
        let coordinator = runtime.coordinator(&conn).unwrap();
        let (_, owner) = coordinator.authenticate(&verifier, "owner-token").unwrap();
        let (_, intruder) = coordinator
            .authenticate(&verifier, "intruder-token")
            .unwrap();
        let project = coordinator.create_project(&owner, "Owned").unwrap();
        let spec = coordinator
            .create_specification(&owner, project.project_id, "Spec")
            .unwrap();
        let item = coordinator
            .insert_item(&owner, spec.spec_id, "Item", None)
            .unwrap();
        (owner, intruder, project, spec, item)
    };

    World {
        conn,
        runtime,
        owner,
        intruder,
        project,
        spec,
        item,
    }
}

fn assert_forbidden<T: std::fmt::Debug>(result: Result<T, CoreError>, target: EntityRef) {
    match result {
        Err(CoreError::Forbidden(actual)) => assert_eq!(actual, target),
        other => panic!("expected Forbidden({target}), got {other:?}"),
    }
}

fn assert_not_found<T: std::fmt::Debug>(result: Result<T, CoreError>, target: EntityRef) {
    match result {
        Err(CoreError::NotFound(actual)) => assert_eq!(actual, target),
        other => panic!("expected NotFound({target}), got {other:?}"),
    }
}

#[test]
fn non_owner_is_forbidden_on_every_live_level() {
    let w = world();
    let c = w.runtime.coordinator(&w.conn).unwrap();
    let project = EntityRef::project(w.project.project_id);
    let spec = EntityRef::specification(w.spec.spec_id);
    let item = EntityRef::bullet_item(w.item.item_id);

    assert_forbidden(c.get_project(&w.intruder, w.project.project_id), project);
    assert_forbidden(c.rename_project(&w.intruder, w.project.project_id, "x"), project);
    assert_forbidden(
        c.create_specification(&w.intruder, w.project.project_id, "x"),
        project,
    );
    assert_forbidden(c.delete_project(&w.intruder, w.project.project_id), project);

    assert_forbidden(c.get_specification(&w.intruder, w.spec.spec_id), spec);
    assert_forbidden(c.update_specification(&w.intruder, w.spec.spec_id, "x"), spec);
    assert_forbidden(c.insert_item(&w.intruder, w.spec.spec_id, "x", None), spec);
    assert_forbidden(c.list_items(&w.intruder, w.spec.spec_id), spec);
    assert_forbidden(
        c.reorder_items(&w.intruder, w.spec.spec_id, &[(w.item.item_id, 0)]),
        spec,
    );
    assert_forbidden(c.delete_specification(&w.intruder, w.spec.spec_id), spec);

    assert_forbidden(c.get_item(&w.intruder, w.item.item_id), item);
    assert_forbidden(c.update_item(&w.intruder, w.item.item_id, "x"), item);
    assert_forbidden(c.delete_item(&w.intruder, w.item.item_id), item);

    let forbidden = c.delete_item(&w.intruder, w.item.item_id).unwrap_err();
    assert_eq!(forbidden.code(), "PRJ002");
    assert!(!forbidden.is_retryable());

    // Nothing the intruder tried was applied.
    assert_eq!(
        c.list_items(&w.owner, w.spec.spec_id).unwrap(),
        vec![w.item.clone()]
    );
    assert_eq!(
        c.get_project(&w.owner, w.project.project_id).unwrap().title,
        "Owned"
    );
}

#[test]
fn missing_entities_are_not_found_for_everyone() {
    let w = world();
    let c = w.runtime.coordinator(&w.conn).unwrap();

    for scope in [&w.owner, &w.intruder] {
        assert_not_found(c.get_project(scope, 9_999), EntityRef::project(9_999));
        assert_not_found(
            c.insert_item(scope, 9_999, "x", None),
            EntityRef::specification(9_999),
        );
        assert_not_found(c.delete_item(scope, 9_999), EntityRef::bullet_item(9_999));
    }
}

#[test]
fn deleted_descendants_are_not_found_rather_than_forbidden() {
    let w = world();
    let c = w.runtime.coordinator(&w.conn).unwrap();
    c.delete_specification(&w.owner, w.spec.spec_id).unwrap();

    let spec = EntityRef::specification(w.spec.spec_id);
    let item = EntityRef::bullet_item(w.item.item_id);
    for scope in [&w.owner, &w.intruder] {
        assert_not_found(c.get_specification(scope, w.spec.spec_id), spec);
        assert_not_found(c.list_items(scope, w.spec.spec_id), spec);
        assert_not_found(c.get_item(scope, w.item.item_id), item);
        assert_not_found(c.update_item(scope, w.item.item_id, "x"), item);
    }

    // The project itself is still live and still guarded.
    assert_forbidden(
        c.get_project(&w.intruder, w.project.project_id),
        EntityRef::project(w.project.project_id),
    );
}

#[test]
fn project_listing_is_scoped_to_owner() {
    let w = world();
    let c = w.runtime.coordinator(&w.conn).unwrap();

    let owned = c.list_projects(&w.owner).unwrap();
    assert_eq!(owned, vec![w.project.clone()]);
    assert!(c.list_projects(&w.intruder).unwrap().is_empty());

    let theirs = c.create_project(&w.intruder, "Theirs").unwrap();
    assert_eq!(c.list_projects(&w.intruder).unwrap(), vec![theirs]);
    assert_eq!(c.list_projects(&w.owner).unwrap().len(), 1);
}

#[test]
fn rejected_and_unknown_credentials_do_not_authenticate() {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let c = runtime.coordinator(&conn).unwrap();
    let verifier = StaticIdentityVerifier::new().with_expired("stale");

    let expired = c.authenticate(&verifier, "stale").unwrap_err();
    assert!(matches!(expired, CoreError::Auth(AuthError::Expired)));
    assert_eq!(expired.code(), "AUTH002");
    assert!(matches!(
        c.authenticate(&verifier, "nope").unwrap_err(),
        CoreError::Auth(AuthError::InvalidCredential)
    ));

    // A scope for a user that never authenticated cannot create projects.
    let stranger = RequestScope::new(Uuid::new_v4());
    assert!(matches!(
        c.create_project(&stranger, "x").unwrap_err(),
        CoreError::Auth(AuthError::InvalidCredential)
    ));
}

#[test]
fn authenticate_refreshes_profile_without_new_user() {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let c = runtime.coordinator(&conn).unwrap();
    let user_id = Uuid::new_v4();
    let first = StaticIdentityVerifier::new().with_identity(
        "t",
        VerifiedIdentity {
            user_id,
            email: "Ada@Example.com".to_string(),
            display_name: "Ada".to_string(),
        },
    );
    let second = StaticIdentityVerifier::new().with_identity(
        "t",
        VerifiedIdentity {
            user_id,
            email: "ada@example.com".to_string(),
            display_name: "Ada Lovelace".to_string(),
        },
    );

    let (user, scope) = c.authenticate(&first, "t").unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(scope.user_id(), user_id);

    let (updated, _) = c.authenticate(&second, "t").unwrap();
    assert_eq!(updated.display_name, "Ada Lovelace");
    assert_eq!(updated.created_at, user.created_at);
}

#[test]
fn email_registered_to_another_user_is_a_permanent_rejection() {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let c = runtime.coordinator(&conn).unwrap();
    let verifier = StaticIdentityVerifier::new()
        .with_identity("first", identity("same@example.com"))
        .with_identity("second", identity("Same@Example.com"));
    let (first, _) = c.authenticate(&verifier, "first").unwrap();

    for _ in 0..2 {
        let err = c.authenticate(&verifier, "second").unwrap_err();
        assert!(
            matches!(
                &err,
                CoreError::Validation(ValidationError::EmailTaken(email)) if email == "same@example.com"
            ),
            "got {err:?}"
        );
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "VAL001");
    }

    // The original user is untouched and can still sign in.
    let (again, _) = c.authenticate(&verifier, "first").unwrap();
    assert_eq!(again.user_id, first.user_id);
}
