mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{read_blob, Form, Harness, PNG_HEADER};
use pimbin::errors::{AuthError, PimbinError};
use pimbin::id::{self, IdAllocator, IdStrategy};

const ABC_HASH: &str = "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0";

/// Always hands out the same id, counting how often it was asked.
struct FixedId {
    calls: Arc<AtomicUsize>,
}

#[rocket::async_trait]
impl IdAllocator for FixedId {
    async fn next_id(&self) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        "AAAAAA".to_string()
    }
}

#[tokio::test]
async fn files_follow_their_index_not_the_wire_order() {
    let h = Harness::new().await;
    let form = Form::new()
        .file("file:2", None, b"two")
        .text("name:0", "zero.txt")
        .file("file:0", None, b"zero")
        .file("f:1", Some("one.md"), b"one");

    let paste = h.upload(&h.sam(), form).await.unwrap();

    let names: Vec<_> = paste.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["zero.txt", "one.md", "2.txt"]);
    assert_eq!(read_blob(&h.pimbin, &paste.files[0].hash).await, b"zero");
    assert_eq!(read_blob(&h.pimbin, &paste.files[2].hash).await, b"two");

    let stored = h.pimbin.get_paste(&paste.id).await.unwrap();
    assert_eq!(stored, paste);
    assert_eq!(stored.owner, "sam");
}

#[tokio::test]
async fn identical_content_is_stored_once() {
    let h = Harness::new().await;
    let form = Form::new()
        .file("file:0", None, b"abc")
        .text("name:0", "a.txt")
        .file("file:1", None, b"abc")
        .text("name:1", "b.txt");

    let paste = h.upload(&h.sam(), form).await.unwrap();

    assert_eq!(paste.files.len(), 2);
    assert!(paste.files.iter().all(|f| f.hash == ABC_HASH));
    assert_eq!(h.blob_count(), 1);
}

#[tokio::test]
async fn lone_file_is_named_after_its_type() {
    let h = Harness::new().await;

    let text = Form::new().file("file:0", None, b"hello\n");
    let paste = h.upload(&h.sam(), text).await.unwrap();
    assert_eq!(paste.files[0].name, ".txt");

    let png = Form::new().file("file:0", None, PNG_HEADER);
    let paste = h.upload(&h.sam(), png).await.unwrap();
    assert_eq!(paste.files[0].name, ".png");
}

#[tokio::test]
async fn names_up_to_128_bytes_are_kept() {
    let h = Harness::new().await;
    let name = "n".repeat(128);
    let form = Form::new()
        .file("file:0", None, b"a")
        .text("name:0", &name);

    let paste = h.upload(&h.sam(), form).await.unwrap();
    assert_eq!(paste.files[0].name, name);
}

#[tokio::test]
async fn denied_type_is_rejected_before_storage() {
    let h = Harness::with_config(|c| c.filter_types = vec!["image/png".to_string()]).await;
    let form = Form::new().file("file:0", Some("cat.png"), PNG_HEADER);

    let err = h.upload(&h.sam(), form).await.unwrap_err();

    assert!(matches!(err, PimbinError::Policy(ref mime) if mime == "image/png"), "{err:?}");
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn allow_list_only_lets_listed_types_in() {
    let h = Harness::with_config(|c| {
        c.filter_allow = true;
        c.filter_types = vec!["text/plain".to_string()];
    })
    .await;

    let text = Form::new().file("file:0", None, b"plain words");
    assert!(h.upload(&h.sam(), text).await.is_ok());

    let png = Form::new().file("file:0", None, PNG_HEADER);
    assert!(matches!(
        h.upload(&h.sam(), png).await,
        Err(PimbinError::Policy(_))
    ));
}

#[tokio::test]
async fn malformed_uploads_are_rejected() {
    let h = Harness::new().await;
    let long_name = "n".repeat(129);
    let cases = vec![
        (
            "duplicate file index",
            Form::new()
                .file("file:0", None, b"a")
                .file("file:0", None, b"b"),
        ),
        (
            "duplicate name index",
            Form::new()
                .file("file:0", None, b"a")
                .text("name:0", "a")
                .text("name:0", "b"),
        ),
        (
            "duplicate name",
            Form::new()
                .file("file:0", None, b"a")
                .file("file:1", None, b"b")
                .text("name:0", "same")
                .text("name:1", "same"),
        ),
        (
            "name clashing with a filename",
            Form::new()
                .file("file:0", Some("a.txt"), b"a")
                .file("file:1", None, b"b")
                .text("name:1", "a.txt"),
        ),
        (
            "name clashing with a fallback name",
            Form::new()
                .file("file:0", None, b"a")
                .file("file:1", None, b"b")
                .text("name:1", "0.txt"),
        ),
        (
            "name too long",
            Form::new()
                .file("file:0", None, b"a")
                .text("name:0", &long_name),
        ),
        (
            "name not utf-8",
            Form::new()
                .file("file:0", None, b"a")
                .file("name:0", None, &[0xff, 0xfe, b'a']),
        ),
        (
            "filename too long",
            Form::new().file("file:0", Some(&long_name), b"a"),
        ),
        (
            "name without file",
            Form::new()
                .file("file:0", None, b"a")
                .text("name:1", "orphan"),
        ),
        ("no file at all", Form::new().text("name:0", "alone")),
        ("unknown part", Form::new().file("blob:0", None, b"a")),
    ];

    for (case, form) in cases {
        let res = h.upload(&h.sam(), form).await;
        assert!(
            matches!(res, Err(PimbinError::Validation(_))),
            "{case}: {res:?}"
        );
    }
}

#[tokio::test]
async fn oversize_body_is_rejected_and_cleaned_up() {
    let h = Harness::with_config(|c| c.max_body_size = 256).await;
    let form = Form::new().file("file:0", None, &[b'a'; 4096]);

    let res = h.upload(&h.sam(), form).await;

    assert!(matches!(res, Err(PimbinError::Validation(_))), "{res:?}");
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn taken_ids_are_retried_then_given_up() {
    let calls = Arc::new(AtomicUsize::new(0));
    let h = Harness::with_allocator(Box::new(FixedId {
        calls: calls.clone(),
    }))
    .await;

    let first = h
        .upload(&h.sam(), Form::new().file("file:0", None, b"first"))
        .await
        .unwrap();
    assert_eq!(first.id, "AAAAAA");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let err = h
        .upload(&h.sam(), Form::new().file("file:0", None, b"second"))
        .await
        .unwrap_err();
    assert!(matches!(err, PimbinError::Other(_)), "{err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    // the first paste is untouched
    assert_eq!(h.pimbin.get_paste("AAAAAA").await.unwrap(), first);
}

#[tokio::test]
async fn only_the_owner_can_delete() {
    let h = Harness::new().await;
    let form = Form::new().file("file:0", None, b"mine");
    let paste = h.upload(&h.sam(), form).await.unwrap();

    let err = h.pimbin.delete_paste(&h.eve(), &paste.id).await.unwrap_err();
    assert!(matches!(err, PimbinError::Auth(AuthError::NotOwner(..))));
    assert_eq!(h.pimbin.get_paste(&paste.id).await.unwrap(), paste);

    h.pimbin.delete_paste(&h.sam(), &paste.id).await.unwrap();
    assert!(matches!(
        h.pimbin.get_paste(&paste.id).await,
        Err(PimbinError::NotFound(_))
    ));
    // blobs outlive the pastes referencing them
    assert_eq!(read_blob(&h.pimbin, &paste.files[0].hash).await, b"mine");
}

#[tokio::test]
async fn tick_ids_are_unique_and_timestamped() {
    let h = Harness::with_config(|c| {
        c.id_strategy = IdStrategy::Tick;
        c.id_interval_ms = 1;
    })
    .await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let form = Form::new().file("file:0", None, b"tick");
        let paste = h.upload(&h.sam(), form).await.unwrap();
        ids.push(paste.id);
    }

    assert_eq!(ids[0].len(), 6);
    let stamps: Vec<_> = ids.iter().filter_map(|id| id::decode_timestamp(id)).collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn concurrent_uploads_get_distinct_ids() {
    let h = Harness::with_config(|c| {
        c.id_strategy = IdStrategy::Tick;
        c.id_interval_ms = 1;
    })
    .await;
    let (sam, eve) = (h.sam(), h.eve());

    let (a, b) = tokio::join!(
        h.upload(&sam, Form::new().file("file:0", None, b"left")),
        h.upload(&eve, Form::new().file("file:0", None, b"right")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.id, b.id);
    assert_eq!(h.pimbin.get_paste(&a.id).await.unwrap().owner, "sam");
    assert_eq!(h.pimbin.get_paste(&b.id).await.unwrap().owner, "eve");
}
