use specboard_core::{
    open_db_in_memory, CascadeSummary, CoreError, CoreRuntime, EntityRef, StaticIdentityVerifier,
    VerifiedIdentity,
};
use uuid::Uuid;

fn verifier() -> StaticIdentityVerifier {
    StaticIdentityVerifier::new().with_identity(
        "token",
        VerifiedIdentity {
            user_id: Uuid::new_v4(),
            email: "owner@example.com".to_string(),
            display_name: "Owner".to_string(),
        },
    )
}

#[test]
fn project_delete_cascades_to_every_live_descendant() {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let c = runtime.coordinator(&conn).unwrap();
    let (_, scope) = c.authenticate(&verifier(), "token").unwrap();

    let project = c.create_project(&scope, "Doomed").unwrap();
    let keep = c.create_project(&scope, "Kept").unwrap();
    let first = c
        .create_specification(&scope, project.project_id, "first")
        .unwrap();
    let second = c
        .create_specification(&scope, project.project_id, "second")
        .unwrap();
    let kept_spec = c
        .create_specification(&scope, keep.project_id, "kept")
        .unwrap();
    for spec_id in [first.spec_id, second.spec_id, kept_spec.spec_id] {
        c.insert_item(&scope, spec_id, "a", None).unwrap();
        c.insert_item(&scope, spec_id, "b", None).unwrap();
    }
    // Already-deleted rows are not counted again.
    let gone = c.list_items(&scope, first.spec_id).unwrap()[0].item_id;
    c.delete_item(&scope, gone).unwrap();

    let summary = c.delete_project(&scope, project.project_id).unwrap();
    assert_eq!(
        summary,
        CascadeSummary {
            specifications: 2,
            bullet_items: 3,
        }
    );

    assert!(matches!(
        c.get_project(&scope, project.project_id),
        Err(CoreError::NotFound(target)) if target == EntityRef::project(project.project_id)
    ));
    assert!(matches!(
        c.list_items(&scope, second.spec_id),
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        c.delete_project(&scope, project.project_id),
        Err(CoreError::NotFound(_))
    ));

    assert_eq!(c.list_projects(&scope).unwrap(), vec![keep.clone()]);
    assert_eq!(c.list_items(&scope, kept_spec.spec_id).unwrap().len(), 2);
    assert!(c.audit_dense_order().unwrap().is_empty());
}

#[test]
fn cascade_keeps_rows_as_tombstones() {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let c = runtime.coordinator(&conn).unwrap();
    let (_, scope) = c.authenticate(&verifier(), "token").unwrap();

    let project = c.create_project(&scope, "P").unwrap();
    let spec = c.create_specification(&scope, project.project_id, "S").unwrap();
    c.insert_item(&scope, spec.spec_id, "a", None).unwrap();
    c.delete_project(&scope, project.project_id).unwrap();

    let (projects, specs, items): (i64, i64, i64) = conn
        .query_row(
            "SELECT
                (SELECT COUNT(*) FROM projects WHERE is_deleted = 1),
                (SELECT COUNT(*) FROM specifications WHERE is_deleted = 1),
                (SELECT COUNT(*) FROM bullet_items WHERE is_deleted = 1);",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((projects, specs, items), (1, 1, 1));
}

#[test]
fn specification_delete_cascades_to_its_items_only() {
    let conn = open_db_in_memory().unwrap();
    let runtime = CoreRuntime::default();
    let c = runtime.coordinator(&conn).unwrap();
    let (_, scope) = c.authenticate(&verifier(), "token").unwrap();

    let project = c.create_project(&scope, "P").unwrap();
    let doomed = c.create_specification(&scope, project.project_id, "doomed").unwrap();
    let sibling = c.create_specification(&scope, project.project_id, "sibling").unwrap();
    for content in ["a", "b", "c"] {
        c.insert_item(&scope, doomed.spec_id, content, None).unwrap();
    }
    let survivor = c.insert_item(&scope, sibling.spec_id, "x", None).unwrap();

    let summary = c.delete_specification(&scope, doomed.spec_id).unwrap();
    assert_eq!(
        summary,
        CascadeSummary {
            specifications: 1,
            bullet_items: 3,
        }
    );
    assert_eq!(
        c.list_specifications(&scope, project.project_id).unwrap(),
        vec![sibling.clone()]
    );
    assert_eq!(c.list_items(&scope, sibling.spec_id).unwrap(), vec![survivor]);
}
