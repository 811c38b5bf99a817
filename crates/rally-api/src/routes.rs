use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
};

use crate::media::MAX_FILE_SIZE;
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{conversations, media, members, messages, reactions};

/// Every REST route. All of them require a bearer token.
pub fn router(state: AppState) -> Router {
    let files = Router::new()
        .route("/files", post(media::upload_file))
        .route("/files/{file_id}", get(media::download_file))
        .layer(DefaultBodyLimit::max(MAX_FILE_SIZE));

    Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_direct),
        )
        .route("/conversations/group", post(conversations::create_group))
        .route(
            "/conversations/{id}",
            get(conversations::get_group)
                .patch(conversations::update_group)
                .delete(conversations::delete_group),
        )
        .route("/conversations/{id}/messages", get(conversations::get_messages))
        .route("/conversations/{id}/members", post(members::add_members))
        .route(
            "/conversations/{id}/members/{user_id}",
            delete(members::remove_member),
        )
        .route(
            "/conversations/{id}/members/{user_id}/role",
            patch(members::update_role),
        )
        .route("/conversations/{id}/leave", post(members::leave_group))
        .route(
            "/conversations/{id}/transfer-ownership",
            post(members::transfer_ownership),
        )
        .route(
            "/conversations/{id}/notifications",
            patch(conversations::set_notifications),
        )
        .route("/messages", post(messages::send_message))
        .route("/messages/read", post(messages::mark_read))
        .route(
            "/messages/{id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route(
            "/messages/{id}/reactions",
            post(reactions::add_reaction).delete(reactions::remove_reaction_by_emoji),
        )
        .route(
            "/messages/{id}/reactions/{reaction_id}",
            delete(reactions::remove_reaction),
        )
        .merge(files)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use rally_gateway::SessionKey;
    use rally_types::events::ServerEvent;
    use rally_types::models::DeviceClass;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn requests_without_valid_token_are_unauthorized() {
        let app = TestApp::new();

        let (status, _) = app.raw("GET", "/conversations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .raw("GET", "/conversations", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn direct_conversation_is_deduplicated() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;

        let (status, first) = app
            .call(&ana, "POST", "/conversations", json!({ "user_id": bo.id }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["created"], true);

        let (status, again) = app
            .call(&bo, "POST", "/conversations", json!({ "user_id": ana.id }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["created"], false);
        assert_eq!(again["conversation_id"], first["conversation_id"]);

        let (status, list) = app.get(&ana, "/conversations").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["participants"][0]["username"], "bo");
    }

    #[tokio::test]
    async fn message_reaches_participants_on_personal_channels() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;
        let conv = app.direct(&ana, &bo).await;

        let bo_phone = SessionKey { user_id: bo.id, device_class: DeviceClass::Mobile };
        let (_, mut bo_rx) = app.state.dispatcher.connect(bo_phone).await;

        let (status, msg) = app
            .call(
                &ana,
                "POST",
                "/messages",
                json!({ "conversation_id": conv, "content": "lunch?" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(msg["content"], "lunch?");
        assert_eq!(msg["sender_username"], "ana");

        // bo never joined the room and still gets it
        match bo_rx.try_recv().unwrap() {
            ServerEvent::Message(m) => assert_eq!(m.content, "lunch?"),
            other => panic!("unexpected {:?}", other),
        }

        let (status, page) = app
            .get(&bo, &format!("/conversations/{}/messages?page=1", conv))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert_eq!(page["has_more"], false);
    }

    #[tokio::test]
    async fn outsiders_are_forbidden() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;
        let eve = app.login("eve").await;
        let conv = app.direct(&ana, &bo).await;

        let (status, _) = app
            .get(&eve, &format!("/conversations/{}/messages", conv))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call(&eve, "POST", "/messages", json!({ "conversation_id": conv, "content": "hi" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.get(&ana, "/conversations/9999/messages").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn read_receipts_only_when_cursor_moves() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;
        let conv = app.direct(&ana, &bo).await;
        let msg = app.send(&ana, conv, "one").await;

        let ana_desk = SessionKey { user_id: ana.id, device_class: DeviceClass::Desktop };
        let (_, mut ana_rx) = app.state.dispatcher.connect(ana_desk).await;

        let body = json!({ "conversation_id": conv, "message_id": msg });
        let (status, res) = app.call(&bo, "POST", "/messages/read", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res["advanced"], true);
        assert!(matches!(
            ana_rx.try_recv(),
            Ok(ServerEvent::MessageRead { user_id, .. }) if user_id == bo.id
        ));

        let (_, res) = app.call(&bo, "POST", "/messages/read", body).await;
        assert_eq!(res["advanced"], false);
        assert!(ana_rx.try_recv().is_err());

        let (_, list) = app.get(&bo, "/conversations").await;
        assert_eq!(list[0]["unread_count"], 0);
    }

    #[tokio::test]
    async fn edit_and_delete_are_sender_only() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;
        let conv = app.direct(&ana, &bo).await;
        let msg = app.send(&ana, conv, "draft").await;
        let path = format!("/messages/{}", msg);

        let (status, _) = app.call(&bo, "PATCH", &path, json!({ "content": "mine" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, edited) = app.call(&ana, "PATCH", &path, json!({ "content": "final" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["is_edited"], true);
        assert_eq!(edited["content"], "final");

        let (status, gone) = app.call(&ana, "DELETE", &path, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(gone["is_deleted"], true);
        assert_eq!(gone["content"], "");

        let (status, again) = app.call(&ana, "DELETE", &path, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["deleted_at"], gone["deleted_at"]);
    }

    #[tokio::test]
    async fn reactions_add_once_and_remove() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;
        let conv = app.direct(&ana, &bo).await;
        let msg = app.send(&ana, conv, "ship it").await;
        let path = format!("/messages/{}/reactions", msg);

        let (status, reaction) = app.call(&bo, "POST", &path, json!({ "emoji": "🚀" })).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, same) = app.call(&bo, "POST", &path, json!({ "emoji": "🚀" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(same["id"], reaction["id"]);

        let other = app.send(&ana, conv, "and this").await;
        let wrong_message = format!("/messages/{}/reactions/{}", other, reaction["id"]);
        let (status, _) = app.call(&bo, "DELETE", &wrong_message, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let by_id = format!("{}/{}", path, reaction["id"]);
        let (status, _) = app.call(&ana, "DELETE", &by_id, Value::Null).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.call(&bo, "DELETE", &by_id, Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call(&bo, "DELETE", &by_id, Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        app.call(&ana, "POST", &path, json!({ "emoji": "👍" })).await;
        let (status, _) = app
            .call(&ana, "DELETE", &format!("{}?emoji=%F0%9F%91%8D", path), Value::Null)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, page) = app.get(&ana, &format!("/conversations/{}/messages", conv)).await;
        assert!(page["messages"][0]["reactions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_roles_transfer_and_delete() {
        let app = TestApp::new();
        let owner = app.login("olga").await;
        let x = app.login("xan").await;
        let y = app.login("yara").await;

        let (status, group) = app
            .call(
                &owner,
                "POST",
                "/conversations/group",
                json!({ "name": "crew", "member_ids": [x.id, y.id] }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = group["id"].as_i64().unwrap();

        let role = |user: Uuid| format!("/conversations/{}/members/{}/role", id, user);
        let (status, _) = app.call(&owner, "PATCH", &role(x.id), json!({ "role": "boss" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, p) = app.call(&owner, "PATCH", &role(x.id), json!({ "role": "admin" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(p["role"], "admin");
        let (status, _) = app.call(&x, "PATCH", &role(y.id), json!({ "role": "admin" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, info) = app
            .call(
                &owner,
                "POST",
                &format!("/conversations/{}/transfer-ownership", id),
                json!({ "user_id": x.id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let role_of = |user: Uuid| {
            info["participants"]
                .as_array()
                .unwrap()
                .iter()
                .find(|p| p["user_id"] == json!(user))
                .map(|p| p["role"].clone())
                .unwrap()
        };
        assert_eq!(role_of(x.id), "owner");
        assert_eq!(role_of(owner.id), "admin");
        assert_eq!(role_of(y.id), "member");

        let path = format!("/conversations/{}", id);
        let (status, _) = app.call(&owner, "DELETE", &path, Value::Null).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let y_desk = rally_gateway::SessionKey { user_id: y.id, device_class: DeviceClass::Desktop };
        let (_, mut y_rx) = app.state.dispatcher.connect(y_desk).await;
        let (status, _) = app.call(&x, "DELETE", &path, Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            y_rx.try_recv().unwrap(),
            ServerEvent::GroupDeleted { conversation_id: id }
        );

        let (status, _) = app.get(&x, &path).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn removed_member_hears_about_it_and_leaves_room() {
        let app = TestApp::new();
        let owner = app.login("olga").await;
        let y = app.login("yara").await;
        let (_, group) = app
            .call(
                &owner,
                "POST",
                "/conversations/group",
                json!({ "name": "crew", "member_ids": [y.id] }),
            )
            .await;
        let id = group["id"].as_i64().unwrap();

        let y_desk = SessionKey { user_id: y.id, device_class: DeviceClass::Desktop };
        let (y_conn, mut y_rx) = app.state.dispatcher.connect(y_desk).await;
        app.state.dispatcher.join_room(id, y_desk, y_conn).await;

        let (status, _) = app
            .call(
                &owner,
                "DELETE",
                &format!("/conversations/{}/members/{}", id, y.id),
                Value::Null,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(matches!(
            y_rx.try_recv(),
            Ok(ServerEvent::MemberRemoved { user_id, removed_by, .. })
                if user_id == y.id && removed_by == owner.id
        ));
        assert!(!app.state.dispatcher.in_room(id, y_desk).await);

        let (status, _) = app
            .call(&owner, "POST", &format!("/conversations/{}/leave", id), Value::Null)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn upload_then_attach_then_delete_removes_blob() {
        let app = TestApp::new();
        let ana = app.login("ana").await;
        let bo = app.login("bo").await;
        let conv = app.direct(&ana, &bo).await;

        let (status, file) = app.upload(&ana, "report.pdf", b"%PDF-1.7").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(file["file_name"], "report.pdf");

        let (status, msg) = app
            .call(
                &ana,
                "POST",
                "/messages",
                json!({ "conversation_id": conv, "kind": "file", "file": file }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let stored = std::fs::read_dir(app.state.media.root()).unwrap().count();
        assert_eq!(stored, 1);

        app.call(&ana, "DELETE", &format!("/messages/{}", msg["id"]), Value::Null)
            .await;
        let stored = std::fs::read_dir(app.state.media.root()).unwrap().count();
        assert_eq!(stored, 0);
    }
}
