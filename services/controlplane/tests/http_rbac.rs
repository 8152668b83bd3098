mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{read_json, test_app};
use http_helpers::{empty_request, json_request};
use keygate_controlplane::audit::{ActorKind, AuditEvent};
use serde_json::json;
use tower::ServiceExt;

async fn send(router: &axum::Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.expect("response")
}

async fn create_permission(router: &axum::Router, ws: &str, name: &str) -> String {
    let response = send(
        router,
        json_request("POST", "/v1/permissions", ws, json!({ "name": name })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await["id"]
        .as_str()
        .expect("id")
        .to_string()
}

async fn create_role(router: &axum::Router, ws: &str, name: &str, perms: &[&str]) -> String {
    let response = send(
        router,
        json_request(
            "POST",
            "/v1/roles",
            ws,
            json!({ "name": name, "permissionIds": perms }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await["roleId"]
        .as_str()
        .expect("role id")
        .to_string()
}

#[tokio::test]
async fn health_reports_memory_backend() {
    let app = test_app().await;
    let response = send(
        &app.router,
        Request::builder()
            .uri("/v1/system/health")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["durable"], false);
}

#[tokio::test]
async fn missing_workspace_header_is_unauthorized() {
    let app = test_app().await;
    let response = send(
        &app.router,
        Request::builder()
            .uri("/v1/roles")
            .header("x-request-id", "req-1")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await;
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["requestId"], "req-1");
}

#[tokio::test]
async fn permission_crud_maps_errors_to_status_codes() {
    let app = test_app().await;
    let id = create_permission(&app.router, "ws_1", "api.*.read_key").await;

    let duplicate = send(
        &app.router,
        json_request(
            "POST",
            "/v1/permissions",
            "ws_1",
            json!({ "name": "api.*.read_key" }),
        ),
    )
    .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(duplicate).await["code"], "conflict");

    let blank = send(
        &app.router,
        json_request("POST", "/v1/permissions", "ws_1", json!({ "name": "  " })),
    )
    .await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(blank).await["code"], "validation_error");

    let updated = send(
        &app.router,
        json_request(
            "PATCH",
            &format!("/v1/permissions/{id}"),
            "ws_1",
            json!({ "name": "api.*.create_key", "description": "create keys" }),
        ),
    )
    .await;
    assert_eq!(updated.status(), StatusCode::NO_CONTENT);

    let fetched = send(
        &app.router,
        empty_request("GET", &format!("/v1/permissions/{id}"), "ws_1"),
    )
    .await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let body = read_json(fetched).await;
    assert_eq!(body["name"], "api.*.create_key");
    assert_eq!(body["slug"], "api.*.create_key");
    assert_eq!(body["description"], "create keys");

    let deleted = send(
        &app.router,
        empty_request("DELETE", &format!("/v1/permissions/{id}"), "ws_1"),
    )
    .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = send(
        &app.router,
        empty_request("GET", &format!("/v1/permissions/{id}"), "ws_1"),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(missing).await["code"], "not_found");
}

#[tokio::test]
async fn upsert_returns_permissions_in_input_order() {
    let app = test_app().await;
    create_permission(&app.router, "ws_1", "b.read").await;
    let response = send(
        &app.router,
        json_request(
            "POST",
            "/v1/permissions/upsert",
            "ws_1",
            json!({ "names": ["c.write", "b.read", "a.delete"] }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let names: Vec<&str> = body["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|item| item["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["c.write", "b.read", "a.delete"]);

    let created = app
        .audit
        .events()
        .into_iter()
        .filter(|event| *event == AuditEvent::PermissionCreate)
        .count();
    assert_eq!(created, 3);
}

#[tokio::test]
async fn slugs_reject_any_unknown_role() {
    let app = test_app().await;
    let read = create_permission(&app.router, "ws_1", "api.*.read_key").await;
    let role = create_role(&app.router, "ws_1", "reader", &[&read]).await;

    let response = send(
        &app.router,
        json_request(
            "POST",
            "/v1/rbac/slugs",
            "ws_1",
            json!({ "roleIds": [role, "role_missing"], "permissionIds": [] }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["code"], "validation_error");
    assert!(body["message"].as_str().expect("message").contains("role_missing"));
}

#[tokio::test]
async fn key_rbac_flow_reports_effective_permissions() {
    let app = test_app().await;
    let read = create_permission(&app.router, "ws_1", "api.*.read_key").await;
    let create = create_permission(&app.router, "ws_1", "api.*.create_key").await;
    let role = create_role(&app.router, "ws_1", "key-admin", &[&read]).await;

    let replaced = send(
        &app.router,
        json_request(
            "PUT",
            "/v1/keys/key_1/rbac",
            "ws_1",
            json!({
                "roleIds": [role],
                "directPermissionIds": [read, create],
                "expectedVersion": 0
            }),
        ),
    )
    .await;
    assert_eq!(replaced.status(), StatusCode::OK);
    let body = read_json(replaced).await;
    assert_eq!(body["keyId"], "key_1");
    assert_eq!(body["rolesAssigned"], 1);
    assert_eq!(body["directPermissionsAssigned"], 2);
    assert_eq!(body["totalEffectivePermissions"], 2);
    assert_eq!(body["version"], 1);

    let view = send(&app.router, empty_request("GET", "/v1/keys/key_1/rbac", "ws_1")).await;
    assert_eq!(view.status(), StatusCode::OK);
    let body = read_json(view).await;
    assert_eq!(body["name"], "primary");
    assert_eq!(body["version"], 1);
    assert_eq!(body["roles"][0]["name"], "key-admin");
    let permissions = body["permissions"].as_array().expect("permissions");
    assert_eq!(permissions.len(), 2);
    assert!(permissions.iter().all(|perm| perm["source"] == "direct"));
    assert_eq!(body["summary"]["total"], 2);
    assert_eq!(body["summary"]["categories"]["Keys"], 2);

    let slugs = send(
        &app.router,
        json_request(
            "POST",
            "/v1/rbac/slugs",
            "ws_1",
            json!({ "roleIds": [role], "permissionIds": [create] }),
        ),
    )
    .await;
    assert_eq!(slugs.status(), StatusCode::OK);
    let body = read_json(slugs).await;
    assert_eq!(body["slugs"], json!(["api.*.create_key", "api.*.read_key"]));
    assert_eq!(body["totalCount"], 2);
    assert_eq!(body["breakdown"]["fromRoles"], 1);
    assert_eq!(body["breakdown"]["fromDirectPermissions"], 1);

    let role_view = send(
        &app.router,
        empty_request("GET", &format!("/v1/roles/{role}/rbac"), "ws_1"),
    )
    .await;
    assert_eq!(role_view.status(), StatusCode::OK);
    let body = read_json(role_view).await;
    assert_eq!(body["keys"][0]["id"], "key_1");
    assert_eq!(body["permissions"][0]["name"], "api.*.read_key");

    let entry = app
        .audit
        .entries()
        .into_iter()
        .find(|entry| entry.event == AuditEvent::ReplaceKeyRbac)
        .expect("replace audit");
    assert_eq!(entry.workspace_id, "ws_1");
    assert_eq!(entry.actor.id, "user_1");
    assert_eq!(entry.actor.kind, ActorKind::User);
}

#[tokio::test]
async fn stale_expected_version_is_a_conflict() {
    let app = test_app().await;
    let perm = create_permission(&app.router, "ws_1", "api.*.read_key").await;
    let request = || {
        json_request(
            "PUT",
            "/v1/keys/key_1/rbac",
            "ws_1",
            json!({ "roleIds": [], "directPermissionIds": [perm], "expectedVersion": 0 }),
        )
    };
    assert_eq!(send(&app.router, request()).await.status(), StatusCode::OK);
    let stale = send(&app.router, request()).await;
    assert_eq!(stale.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn replace_with_unknown_ids_changes_nothing() {
    let app = test_app().await;
    let perm = create_permission(&app.router, "ws_1", "api.*.read_key").await;
    let connected = send(
        &app.router,
        empty_request("PUT", &format!("/v1/keys/key_1/permissions/{perm}"), "ws_1"),
    )
    .await;
    assert_eq!(connected.status(), StatusCode::NO_CONTENT);

    let rejected = send(
        &app.router,
        json_request(
            "PUT",
            "/v1/keys/key_1/rbac",
            "ws_1",
            json!({ "roleIds": ["role_missing"], "directPermissionIds": [] }),
        ),
    )
    .await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let body = read_json(rejected).await;
    assert!(
        body["message"]
            .as_str()
            .expect("message")
            .contains("role_missing")
    );

    let view = read_json(send(&app.router, empty_request("GET", "/v1/keys/key_1/rbac", "ws_1")).await).await;
    assert_eq!(view["permissions"][0]["id"], json!(perm));
}

#[tokio::test]
async fn delete_roles_accepts_single_id_or_list() {
    let app = test_app().await;
    let admin = create_role(&app.router, "ws_1", "admin", &[]).await;
    let reader = create_role(&app.router, "ws_1", "reader", &[]).await;
    let writer = create_role(&app.router, "ws_1", "writer", &[]).await;

    let single = send(
        &app.router,
        json_request("POST", "/v1/roles/delete", "ws_1", json!({ "roleIds": admin })),
    )
    .await;
    assert_eq!(single.status(), StatusCode::OK);
    assert_eq!(read_json(single).await["deletedCount"], 1);

    let partial = send(
        &app.router,
        json_request(
            "POST",
            "/v1/roles/delete",
            "ws_1",
            json!({ "roleIds": [reader, "role_missing"] }),
        ),
    )
    .await;
    assert_eq!(partial.status(), StatusCode::NOT_FOUND);

    let many = send(
        &app.router,
        json_request(
            "POST",
            "/v1/roles/delete",
            "ws_1",
            json!({ "roleIds": [reader, writer] }),
        ),
    )
    .await;
    assert_eq!(many.status(), StatusCode::OK);
    assert_eq!(read_json(many).await["deletedCount"], 2);

    let empty = send(
        &app.router,
        json_request("POST", "/v1/roles/delete", "ws_1", json!({ "roleIds": [] })),
    )
    .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let list = read_json(send(&app.router, empty_request("GET", "/v1/roles", "ws_1")).await).await;
    assert_eq!(list["items"], json!([]));
}

#[tokio::test]
async fn other_workspace_resources_are_not_found() {
    let app = test_app().await;
    let perm = create_permission(&app.router, "ws_1", "api.*.read_key").await;
    let role = create_role(&app.router, "ws_1", "admin", &[]).await;

    let cross_get = send(
        &app.router,
        empty_request("GET", &format!("/v1/roles/{role}"), "ws_2"),
    )
    .await;
    assert_eq!(cross_get.status(), StatusCode::NOT_FOUND);

    let cross_key = send(
        &app.router,
        empty_request("PUT", &format!("/v1/keys/key_1/roles/{role}"), "ws_2"),
    )
    .await;
    assert_eq!(cross_key.status(), StatusCode::NOT_FOUND);

    let cross_perm = send(
        &app.router,
        empty_request("PUT", &format!("/v1/keys/key_2/permissions/{perm}"), "ws_2"),
    )
    .await;
    assert_eq!(cross_perm.status(), StatusCode::NOT_FOUND);

    let listed = read_json(send(&app.router, empty_request("GET", "/v1/permissions", "ws_2")).await).await;
    assert_eq!(listed["items"], json!([]));
}

#[tokio::test]
async fn soft_deleted_key_is_not_found() {
    let app = test_app().await;
    app.store
        .soft_delete_key("ws_1", "key_1")
        .await
        .expect("soft delete");
    let response = send(&app.router, empty_request("GET", "/v1/keys/key_1/rbac", "ws_1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = test_app().await;
    let response = send(
        &app.router,
        Request::builder()
            .uri("/v1/openapi.json")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert!(body["paths"].get("/v1/keys/{key_id}/rbac").is_some());
}
