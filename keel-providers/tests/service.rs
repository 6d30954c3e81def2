mod common;

use common::{fixtures, list, p, write};
use keel_core::StorageService;

#[tokio::test]
async fn init_creates_the_library_base() {
    for fx in fixtures() {
        let service = StorageService::new(fx.backend.clone(), p("media/library"));
        service.init().await.unwrap();
        service.init().await.unwrap();

        assert_eq!(list(&fx.backend, "media").await, vec!["library"], "{}", fx.name);
    }
}

#[tokio::test]
async fn delete_files_is_best_effort() {
    let fx = common::local();
    write(&fx.backend, "library/a.jpg", "a").await;
    write(&fx.backend, "library/b.jpg", "b").await;
    let service = StorageService::new(fx.backend.clone(), p("library"));

    let summary = service
        .delete_files(["library/a.jpg", "", "library/missing.jpg", "../escape", "library/b.jpg"])
        .await;

    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.failed, vec!["library/missing.jpg", "../escape"]);
    assert!(!fx.backend.check_file_exists(&p("library/a.jpg")).await);
    assert!(!fx.backend.check_file_exists(&p("library/b.jpg")).await);
}

#[tokio::test]
async fn delete_files_continues_past_store_failures() {
    let fx = common::object_store();
    write(&fx.backend, "a.jpg", "a").await;
    write(&fx.backend, "b.jpg", "b").await;
    fx.store.as_ref().unwrap().fail_key("a.jpg");
    let service = StorageService::new(fx.backend.clone(), p("library"));

    let summary = service.delete_files(vec!["a.jpg".to_string(), "b.jpg".to_string()]).await;

    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.failed, vec!["a.jpg"]);
    assert_eq!(fx.store.as_ref().unwrap().keys(), vec!["a.jpg"]);
}
