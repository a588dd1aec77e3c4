mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, read_json, TestApp};
use serde_json::json;
use uuid::Uuid;

const PASSWORD: &str = "Sup3rSecret";

#[tokio::test]
async fn upload_view_and_version_a_document() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("docs@example.com", PASSWORD, "Docs Owner").await?;
    let case_id = app.create_case(&owner.access_token, "Contract Dispute").await?;

    let response = app
        .upload_document(&owner.access_token, case_id, "Motion to  Dismiss", b"%PDF-1.7 body")
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let document = read_json(response).await?;
    assert_eq!(document["status"], "draft");
    assert_eq!(document["size_bytes"], 13);
    let document_id = document["id"].as_str().unwrap().to_string();
    let file_path = document["file_path"].as_str().unwrap().to_string();
    assert!(file_path.starts_with(&format!("{case_id}/")));
    assert!(file_path.ends_with("-Motion-to-Dismiss"));

    let stored = app.storage().get(&file_path).await.expect("blob stored");
    assert_eq!(stored.bytes, b"%PDF-1.7 body");
    assert_eq!(stored.content_type.as_deref(), Some("application/pdf"));
    assert!(stored
        .content_disposition
        .as_deref()
        .is_some_and(|value| value.starts_with("inline;")));

    let document_path = format!("/api/cases/{case_id}/documents/{document_id}");
    let response = app.get(&document_path, Some(&owner.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let signed = read_json(response).await?;
    assert_eq!(signed["expires_in"], 60);
    assert!(signed["url"].as_str().unwrap().contains(&file_path));

    let versions_path = format!("{document_path}/versions");
    for comment in ["first revision", "second revision"] {
        let response = app
            .post_json(
                &versions_path,
                &json!({ "content": "JVBERi0xLjg=", "comment": comment }),
                Some(&owner.access_token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.get(&versions_path, Some(&owner.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let versions = read_json(response).await?;
    let versions = versions.as_array().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0]["version_number"], 2);
    assert_eq!(versions[0]["comment"], "second revision");
    assert_eq!(versions[1]["version_number"], 1);
    assert_eq!(versions[1]["creator"]["email"], "docs@example.com");
    let version_key = versions[0]["file_path"].as_str().unwrap();
    assert!(version_key.starts_with(&format!("{case_id}/{document_id}/v2-")));

    let version_id = versions[1]["id"].as_str().unwrap();
    let response = app
        .get(
            &format!("{versions_path}/{version_id}"),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .patch_json(
            &document_path,
            &json!({ "status": "review", "title": "Motion to Dismiss (amended)" }),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await?;
    assert_eq!(updated["status"], "review");
    assert_eq!(updated["file_path"], file_path.as_str());

    let response = app
        .patch_json(&document_path, &json!({ "status": "shredded" }), Some(&owner.access_token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.delete(&document_path, Some(&owner.access_token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage().object_count().await, 0);

    let response = app.get(&versions_path, Some(&owner.access_token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_creator_or_owner_modifies_documents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("firm@example.com", PASSWORD, "Firm").await?;
    let associate = app.register("assoc@example.com", PASSWORD, "Associate").await?;
    let client = app.register("client@example.com", PASSWORD, "Client").await?;
    let case_id = app.create_case(&owner.access_token, "Estate of Doe").await?;

    for (email, role) in [
        ("assoc@example.com", "associate_attorney"),
        ("client@example.com", "client"),
    ] {
        let response = app
            .post_json(
                &format!("/api/cases/{case_id}/participants"),
                &json!({ "email": email, "role": role }),
                Some(&owner.access_token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .upload_document(&associate.access_token, case_id, "Will", b"last will")
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let document_id = read_json(response).await?["id"]
        .as_str()
        .unwrap()
        .to_string();
    let document_path = format!("/api/cases/{case_id}/documents/{document_id}");

    let response = app.get(&document_path, Some(&client.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("{document_path}/versions"),
            &json!({ "content": "bmV3" }),
            Some(&client.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .patch_json(&document_path, &json!({ "status": "final" }), Some(&client.access_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.delete(&document_path, Some(&client.access_token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .patch_json(&document_path, &json!({ "status": "final" }), Some(&owner.access_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.delete(&document_path, Some(&associate.access_token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_blob_write_leaves_no_metadata() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("outage@example.com", PASSWORD, "Outage").await?;
    let case_id = app.create_case(&owner.access_token, "Flaky Storage").await?;

    app.storage().fail_writes(true);
    let response = app
        .upload_document(&owner.access_token, case_id, "Exhibit A", b"bytes")
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    app.storage().fail_writes(false);

    let response = app
        .get(
            &format!("/api/cases/{case_id}/documents"),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(read_json(response).await?.as_array().map(Vec::len), Some(0));
    assert_eq!(app.storage().object_count().await, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_rejects_missing_fields_and_bad_base64() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("strict@example.com", PASSWORD, "Strict").await?;
    let case_id = app.create_case(&owner.access_token, "Validation").await?;
    let path = format!("/api/cases/{case_id}/documents");

    let response = app
        .post_json(&path, &json!({}), Some(&owner.access_token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await?["errors"].as_array().map(Vec::len),
        Some(3)
    );

    let response = app
        .post_json(
            &path,
            &json!({ "title": "Memo", "document_type": "memo", "content": "***" }),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.storage().object_count().await, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_metadata_write_removes_the_blob() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("saga@example.com", PASSWORD, "Saga").await?;
    let case_id = app.create_case(&owner.access_token, "Broken Metadata").await?;

    app.execute_sql(&format!(
        r#"
        CREATE OR REPLACE FUNCTION reject_document_insert() RETURNS trigger AS $$
        BEGIN
            IF NEW.case_id = '{case_id}' THEN
                RAISE EXCEPTION 'metadata store unavailable';
            END IF;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql;
        DROP TRIGGER IF EXISTS reject_document_insert ON documents;
        CREATE TRIGGER reject_document_insert BEFORE INSERT ON documents
            FOR EACH ROW EXECUTE FUNCTION reject_document_insert();
        "#
    ))
    .await?;

    let response = app
        .upload_document(&owner.access_token, case_id, "Exhibit B", b"exhibit bytes")
        .await?;
    let status = response.status();
    let body = read_json(response).await?;

    app.execute_sql(
        "DROP TRIGGER IF EXISTS reject_document_insert ON documents;
         DROP FUNCTION IF EXISTS reject_document_insert();",
    )
    .await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "persistence error" }));
    assert_eq!(app.storage().object_count().await, 0);

    let response = app
        .get(
            &format!("/api/cases/{case_id}/documents"),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(read_json(response).await?.as_array().map(Vec::len), Some(0));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn version_number_conflict_retries_with_next_free_number() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("race@example.com", PASSWORD, "Racer").await?;
    let case_id = app.create_case(&owner.access_token, "Concurrent Edits").await?;
    let response = app
        .upload_document(&owner.access_token, case_id, "Draft Brief", b"draft")
        .await?;
    let document_id: Uuid = read_json(response).await?["id"]
        .as_str()
        .unwrap()
        .parse()?;

    // An imported version already holds number 1, and the first insert
    // attempt loses to a simulated concurrent upload.
    app.execute_sql(&format!(
        r#"
        INSERT INTO document_versions (id, document_id, version_number, file_path, created_by)
            VALUES ('{imported}', '{document_id}', 1, 'imported/v1', '{owner_id}');
        DROP SEQUENCE IF EXISTS version_race_attempts;
        CREATE SEQUENCE version_race_attempts;
        CREATE OR REPLACE FUNCTION simulate_version_race() RETURNS trigger AS $$
        BEGIN
            IF NEW.document_id = '{document_id}' THEN
                IF nextval('version_race_attempts') = 1 THEN
                    RAISE EXCEPTION 'version number already taken'
                        USING ERRCODE = 'unique_violation';
                END IF;
            END IF;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql;
        DROP TRIGGER IF EXISTS simulate_version_race ON document_versions;
        CREATE TRIGGER simulate_version_race BEFORE INSERT ON document_versions
            FOR EACH ROW EXECUTE FUNCTION simulate_version_race();
        "#,
        imported = Uuid::new_v4(),
        owner_id = owner.id,
    ))
    .await?;

    let versions_path = format!("/api/cases/{case_id}/documents/{document_id}/versions");
    let response = app
        .post_json(
            &versions_path,
            &json!({ "content": "cmV2aXNlZA==", "comment": "after the race" }),
            Some(&owner.access_token),
        )
        .await?;
    let status = response.status();
    let version = read_json(response).await?;

    app.execute_sql(
        "DROP TRIGGER IF EXISTS simulate_version_race ON document_versions;
         DROP FUNCTION IF EXISTS simulate_version_race();
         DROP SEQUENCE IF EXISTS version_race_attempts;",
    )
    .await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(version["version_number"], 2);
    let key = version["file_path"].as_str().unwrap();
    assert!(key.starts_with(&format!("{case_id}/{document_id}/v2-")));
    assert_eq!(
        app.storage().get(key).await.map(|stored| stored.bytes),
        Some(b"revised".to_vec())
    );
    // The document blob and the one stored version; the lost attempt wrote nothing.
    assert_eq!(app.storage().object_count().await, 2);

    let response = app.get(&versions_path, Some(&owner.access_token)).await?;
    let numbers: Vec<i64> = read_json(response)
        .await?
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["version_number"].as_i64())
        .collect();
    assert_eq!(numbers, vec![2, 1]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_version_write_releases_the_reserved_number() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("reserve@example.com", PASSWORD, "Reserver").await?;
    let case_id = app.create_case(&owner.access_token, "Storage Hiccup").await?;
    let response = app
        .upload_document(&owner.access_token, case_id, "Lease", b"lease terms")
        .await?;
    let document_id = read_json(response).await?["id"]
        .as_str()
        .unwrap()
        .to_string();
    let versions_path = format!("/api/cases/{case_id}/documents/{document_id}/versions");

    app.storage().fail_writes(true);
    let response = app
        .post_json(
            &versions_path,
            &json!({ "content": "bGVhc2UgdjI=" }),
            Some(&owner.access_token),
        )
        .await?;
    app.storage().fail_writes(false);
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_json(response).await?, json!({ "error": "storage error" }));

    let response = app.get(&versions_path, Some(&owner.access_token)).await?;
    assert_eq!(read_json(response).await?.as_array().map(Vec::len), Some(0));

    let response = app
        .post_json(
            &versions_path,
            &json!({ "content": "bGVhc2UgdjI=" }),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_json(response).await?["version_number"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn oversized_document_fields_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.register("lengths@example.com", PASSWORD, "Lengths").await?;
    let case_id = app.create_case(&owner.access_token, "Long Titles").await?;

    let response = app
        .upload_document(&owner.access_token, case_id, &"t".repeat(300), b"bytes")
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await?,
        json!({ "errors": ["Title must be at most 255 characters"] })
    );
    assert_eq!(app.storage().object_count().await, 0);

    let response = app
        .upload_document(&owner.access_token, case_id, "Short", b"bytes")
        .await?;
    let document_id = read_json(response).await?["id"]
        .as_str()
        .unwrap()
        .to_string();
    let response = app
        .patch_json(
            &format!("/api/cases/{case_id}/documents/{document_id}"),
            &json!({ "document_type": "x".repeat(101) }),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await?,
        json!({ "errors": ["Document type must be at most 100 characters"] })
    );

    app.cleanup().await?;
    Ok(())
}
