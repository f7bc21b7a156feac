use bar_fswatch::FileWatcher;
use std::fs;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn changed(w: &mut FileWatcher) {
    match tokio::time::timeout(WAIT, w.next()).await {
        Ok(Some(Ok(()))) => {}
        Ok(Some(Err(e))) => panic!("watcher error: {e}"),
        Ok(None) => panic!("watcher closed"),
        Err(_) => panic!("timed out waiting for a change"),
    }
}

/// Let queued events arrive, then forget them.
async fn drain(w: &mut FileWatcher) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    while w.try_changed() {}
}

#[tokio::test]
async fn writes_to_an_existing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("status");
    fs::write(&file, "1").unwrap();

    let mut w = FileWatcher::watch(&file).unwrap();
    assert_eq!(w.path(), file);
    drain(&mut w).await;

    fs::write(&file, "2").unwrap();
    changed(&mut w).await;
}

#[tokio::test]
async fn follows_missing_parents_into_existence() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("a/b/status");
    let mut w = FileWatcher::watch(&file).unwrap();

    fs::create_dir(tmp.path().join("a")).unwrap();
    fs::create_dir(tmp.path().join("a/b")).unwrap();
    drain(&mut w).await;
    assert!(!file.exists());

    fs::write(&file, "up").unwrap();
    changed(&mut w).await;
}

#[tokio::test]
async fn survives_parent_deletion() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("sub");
    let file = dir.join("status");
    fs::create_dir(&dir).unwrap();
    fs::write(&file, "1").unwrap();
    let mut w = FileWatcher::watch(&file).unwrap();

    fs::remove_dir_all(&dir).unwrap();
    changed(&mut w).await;
    drain(&mut w).await;

    fs::create_dir(&dir).unwrap();
    fs::write(&file, "2").unwrap();
    changed(&mut w).await;
    assert_eq!(fs::read_to_string(&file).unwrap(), "2");
}

#[tokio::test]
async fn unsubscribe_is_final() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("status");
    let mut w = FileWatcher::watch(&file).unwrap();
    w.unsubscribe();
    w.unsubscribe();
    fs::write(&file, "x").unwrap();
    assert!(w.next().await.is_none());
    assert!(!w.try_changed());
}
