//! Account endpoint tests: registration, confirmation, login, details,
//! logout and deletion.

use axum::http::{Method, StatusCode};
use serde_json::json;
use uploader::services::storage::FileStore;

mod common;

use common::{PASSWORD, spawn_app};

#[tokio::test]
async fn register_requires_all_fields() {
    let app = spawn_app().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/register/",
            None,
            Some(json!({ "email": "a@example.com", "password": PASSWORD })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["Status"], json!(false));
    assert_eq!(body["Errors"], json!("Not all required arguments are provided"));
}

#[tokio::test]
async fn register_reports_password_errors() {
    let app = spawn_app().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/register/",
            None,
            Some(json!({
                "email": "a@example.com",
                "first_name": "A",
                "last_name": "B",
                "password": "12345",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors = body["Errors"]["password"].as_array().unwrap();
    assert!(errors.iter().any(|e| e == "This password is entirely numeric."));
}

#[tokio::test]
async fn register_rejects_duplicate_email() {
    let app = spawn_app().await;
    app.login_new_user("dup@example.com").await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/register/",
            None,
            Some(json!({
                "email": "dup@example.com",
                "first_name": "A",
                "last_name": "B",
                "password": PASSWORD,
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["Errors"]["email"],
        json!(["user with this email already exists."])
    );
}

#[tokio::test]
async fn confirmation_with_wrong_token_fails() {
    let app = spawn_app().await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/user/register/",
            None,
            Some(json!({
                "email": "c@example.com",
                "first_name": "C",
                "last_name": "D",
                "password": PASSWORD,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/register/confirm/",
            None,
            Some(json!({ "email": "c@example.com", "token": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["Errors"], json!("Wrong token or email"));

    // still inactive
    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/login/",
            None,
            Some(json!({ "email": "c@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["Errors"], json!("User is not active"));
}

#[tokio::test]
async fn login_with_bad_password_is_forbidden() {
    let app = spawn_app().await;
    app.login_new_user("l@example.com").await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/login/",
            None,
            Some(json!({ "email": "l@example.com", "password": "Wrong#pass1" })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["Errors"], json!("Could not authorize"));
}

#[tokio::test]
async fn login_queues_email_and_returns_same_token() {
    let app = spawn_app().await;
    let token = app.login_new_user("t@example.com").await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/login/",
            None,
            Some(json!({ "email": "t@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["Token"], json!(token));

    let task = app.wait_for_task(body["Task_id"].as_str().unwrap()).await;
    assert_eq!(task["Status"], json!("SUCCESS"));
}

#[tokio::test]
async fn details_require_login() {
    let app = spawn_app().await;

    let (status, body) = app
        .json(Method::GET, "/api/v1/user/details/", None, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "Status": false, "Error": "Log in required" }));

    let (status, body) = app
        .json(Method::GET, "/api/v1/user/details/", Some("bogus"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["Error"], json!("Invalid token."));
}

#[tokio::test]
async fn details_can_be_read_and_updated() {
    let app = spawn_app().await;
    let token = app.login_new_user("d@example.com").await;

    let (status, body) = app
        .json(Method::GET, "/api/v1/user/details/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], json!("d@example.com"));
    assert_eq!(body["first_name"], json!("Test"));
    assert!(body.get("password_hash").is_none());

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/details/",
            Some(&token),
            Some(json!({ "first_name": "Renamed" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["Status"], json!(true));
    assert!(body["Task_id"].is_string());

    let (_, body) = app
        .json(Method::GET, "/api/v1/user/details/", Some(&token), None)
        .await;
    assert_eq!(body["first_name"], json!("Renamed"));
    assert_eq!(body["last_name"], json!("User"));
}

#[tokio::test]
async fn logout_revokes_token() {
    let app = spawn_app().await;
    let token = app.login_new_user("o@example.com").await;

    let (status, _) = app
        .json(Method::POST, "/api/v1/user/logout/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .json(Method::GET, "/api/v1/user/details/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_account_removes_user_and_files() {
    let app = spawn_app().await;
    let token = app.login_new_user("x@example.com").await;
    let (status, body) = app
        .upload("/api/v1/file/", &token, "keep.txt", b"data", true)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let file_id = body["File_id"].as_i64().unwrap();

    let (status, _) = app
        .json(Method::DELETE, "/api/v1/user/delete/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .json(Method::GET, "/api/v1/user/details/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.state.disk.find(&file_id).await.is_err());
}

#[tokio::test]
async fn account_endpoints_accept_form_bodies() {
    let app = spawn_app().await;

    let (status, body) = app
        .form(
            Method::POST,
            "/api/v1/user/register/",
            None,
            "email=form%40example.com&first_name=Form&last_name=User&password=Xk9%23mq2%21Lp",
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let confirm_token = body["Token"].as_str().unwrap().to_string();

    let (status, _) = app
        .form(
            Method::POST,
            "/api/v1/user/register/confirm/",
            None,
            &format!("email=form%40example.com&token={}", confirm_token),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .form(
            Method::POST,
            "/api/v1/user/login/",
            None,
            "email=form%40example.com&password=Xk9%23mq2%21Lp",
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    let token = body["Token"].as_str().unwrap().to_string();

    let (status, _) = app
        .form(
            Method::POST,
            "/api/v1/user/details/",
            Some(&token),
            "first_name=Renamed",
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (_, body) = app
        .json(Method::GET, "/api/v1/user/details/", Some(&token), None)
        .await;
    assert_eq!(body["first_name"], json!("Renamed"));
}

#[tokio::test]
async fn unreadable_bodies_get_json_errors() {
    let app = spawn_app().await;

    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/user/login/")
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{\"email\": "))
        .unwrap();
    let (status, _, bytes) = app.send(request).await;
    let body = common::parse_json(&bytes);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["Status"], json!(false));
    assert!(body["Error"].is_string(), "{}", body);

    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/v1/user/login/")
        .header(axum::http::header::CONTENT_TYPE, "text/plain")
        .body(axum::body::Body::from("hello"))
        .unwrap();
    let (status, _, bytes) = app.send(request).await;
    let body = common::parse_json(&bytes);
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["Status"], json!(false));
}

#[tokio::test]
async fn password_reset_round_trip() {
    let app = spawn_app().await;
    app.login_new_user("reset@example.com").await;

    let (status, body) = app
        .form(
            Method::POST,
            "/api/v1/user/password_reset/",
            None,
            "email=reset%40example.com",
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["Status"], json!(true));
    app.wait_for_task(body["Task_id"].as_str().unwrap()).await;

    let mail = app
        .outbox("reset@example.com")
        .await
        .into_iter()
        .find(|mail| mail.subject.starts_with("Password Reset Token"))
        .expect("reset mail");
    let reset_token = mail.body;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/password_reset/confirm/",
            None,
            Some(json!({ "token": reset_token, "password": "short" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["Errors"]["password"].is_array());

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/password_reset/confirm/",
            None,
            Some(json!({ "token": reset_token, "password": "Brand#New42" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body, json!({ "Status": true }));

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/user/login/",
            None,
            Some(json!({ "email": "reset@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/user/login/",
            None,
            Some(json!({ "email": "reset@example.com", "password": "Brand#New42" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn password_reset_rejects_unknown_email_and_token() {
    let app = spawn_app().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/password_reset/",
            None,
            Some(json!({ "email": "nobody@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["Errors"]["email"].is_array());

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/user/password_reset/confirm/",
            None,
            Some(json!({ "token": "not-a-token", "password": "Brand#New42" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["Error"], json!("The password reset token is invalid."));
}
