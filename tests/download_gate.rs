mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use common::{LocalApp, assert_no_cache, body_bytes, send};

#[tokio::test]
async fn report_is_served_once_then_forbidden() {
    let app = LocalApp::new().await;
    app.upload("report.pdf", b"%PDF-1.7 quarterly numbers");

    let started = Utc::now();
    let request = Request::get("/?file=report.pdf")
        .header("x-appengine-country", "SE")
        .header("x-appengine-region", "ab")
        .body(Body::empty())
        .unwrap();
    let first = send(&app.router, request).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_no_cache(&first);
    assert_eq!(body_bytes(first).await, b"%PDF-1.7 quarterly numbers");

    let grant = app.grants.find("report.pdf").await.unwrap().unwrap();
    assert_eq!(grant.country, "SE");
    assert_eq!(grant.region, "ab");
    assert!(grant.downloaded_at >= started);

    let second = app.get("/?file=report.pdf").await;
    assert_eq!(second.status(), StatusCode::FORBIDDEN);
    assert_no_cache(&second);
    assert_eq!(app.grants.count("report.pdf").await.unwrap(), 1);
}

#[tokio::test]
async fn missing_object_is_not_found_and_not_recorded() {
    let app = LocalApp::new().await;

    let response = app.get("/?file=missing.pdf").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_no_cache(&response);
    assert_eq!(app.grants.count("missing.pdf").await.unwrap(), 0);
}

#[tokio::test]
async fn filename_length_boundaries() {
    let app = LocalApp::new().await;
    let at_limit = "a".repeat(128);
    let over_limit = "a".repeat(129);
    app.upload(&at_limit, b"ok");
    app.upload(&over_limit, b"never served");

    let empty = app.get("/?file=").await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let absent = app.get("/").await;
    assert_eq!(absent.status(), StatusCode::BAD_REQUEST);

    let accepted = app.get(&format!("/?file={at_limit}")).await;
    assert_eq!(accepted.status(), StatusCode::OK);

    // 128 two-byte characters are 256 bytes.
    let wide = "%C3%A9".repeat(128);
    let too_wide = app.get(&format!("/?file={wide}")).await;
    assert_eq!(too_wide.status(), StatusCode::BAD_REQUEST);

    let rejected = app.get(&format!("/?file={over_limit}")).await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_no_cache(&rejected);
    assert_eq!(app.grants.count(&over_limit).await.unwrap(), 0);
}

#[tokio::test]
async fn percent_encoded_names_are_decoded() {
    let app = LocalApp::new().await;
    app.upload("q1 report.pdf", b"numbers");

    let response = app.get("/?file=q1%20report.pdf").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.grants.count("q1 report.pdf").await.unwrap(), 1);
}

#[tokio::test]
async fn other_paths_are_not_found() {
    let app = LocalApp::new().await;
    app.upload("report.pdf", b"bytes");

    for uri in ["/download?file=report.pdf", "/report.pdf", "/healthz"] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_no_cache(&response);
    }

    let post = send(
        &app.router,
        Request::post("/elsewhere").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(post.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.grants.count("report.pdf").await.unwrap(), 0);
}

#[tokio::test]
async fn other_methods_are_refused_without_consuming() {
    let app = LocalApp::new().await;
    app.upload("report.pdf", b"bytes");

    for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
        let request = Request::builder()
            .method(method.clone())
            .uri("/?file=report.pdf")
            .body(Body::empty())
            .unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_no_cache(&response);
    }
    assert_eq!(app.grants.count("report.pdf").await.unwrap(), 0);

    let get = app.get("/?file=report.pdf").await;
    assert_eq!(get.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_yield_one_download() {
    let app = LocalApp::new().await;
    app.upload("race.zip", b"the one and only copy");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::get("/?file=race.zip").body(Body::empty()).unwrap();
            let response = send(&router, request).await;
            let status = response.status();
            (status, body_bytes(response).await)
        }));
    }

    let mut ok = 0;
    let mut forbidden = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        match status {
            StatusCode::OK => {
                ok += 1;
                assert_eq!(body, b"the one and only copy");
            }
            StatusCode::FORBIDDEN => forbidden += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(forbidden, 19);
    assert_eq!(app.grants.count("race.zip").await.unwrap(), 1);
}

#[tokio::test]
async fn late_upload_does_not_grant_past_requests() {
    let app = LocalApp::new().await;

    let before = app.get("/?file=late.pdf").await;
    assert_eq!(before.status(), StatusCode::NOT_FOUND);

    app.upload("late.pdf", b"arrived");
    assert_eq!(app.grants.count("late.pdf").await.unwrap(), 0);

    let after = app.get("/?file=late.pdf").await;
    assert_eq!(after.status(), StatusCode::OK);
    assert_eq!(app.grants.count("late.pdf").await.unwrap(), 1);
}

#[tokio::test]
async fn error_bodies_hide_internals() {
    let app = LocalApp::new().await;
    app.upload("report.pdf", b"bytes");
    app.get("/?file=report.pdf").await;

    let response = app.get("/?file=report.pdf").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], 403);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn first_file_parameter_wins() {
    let app = LocalApp::new().await;
    app.upload("a.pdf", b"first");
    app.upload("b.pdf", b"second");

    let response = app.get("/?file=a.pdf&file=b.pdf").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"first");
    assert_eq!(app.grants.count("a.pdf").await.unwrap(), 1);
    assert_eq!(app.grants.count("b.pdf").await.unwrap(), 0);

    let other_params = app.get("/?token=x&file=b.pdf&file=a.pdf").await;
    assert_eq!(other_params.status(), StatusCode::OK);
    assert_eq!(body_bytes(other_params).await, b"second");
}
