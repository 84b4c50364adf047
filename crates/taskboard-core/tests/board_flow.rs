use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use taskboard_core::board::{
    Board, Collaborators, ImageChange, ImageUpload, NoticeLevel, TaskDraft, TaskEdit,
};
use taskboard_core::bucket::Bucket;
use taskboard_core::datetime::Calendar;
use taskboard_core::drag::{DropEvent, DropPlan, DropSlot, IgnoreReason, ViewKind};
use taskboard_core::error::BoardError;
use taskboard_core::filter::{DateFilter, DateFilterKind};
use taskboard_core::memory::{MemoryBlobStore, MemoryIdentity, MemoryTaskStore, StoreOp};
use taskboard_core::store::TaskStore;
use taskboard_core::task::{NewTask, Task, TaskId, User, UserId};

fn now() -> DateTime<Utc> {
    // Monday
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

fn user() -> User {
    User {
        id: UserId::from("u1"),
        email: Some("ana@example.com".to_string()),
    }
}

struct Harness {
    store: Arc<MemoryTaskStore>,
    blobs: Arc<MemoryBlobStore>,
    board: Board,
}

fn harness_with(store: MemoryTaskStore, identity: MemoryIdentity) -> Harness {
    let store = Arc::new(store);
    store.set_clock(now());
    let blobs = Arc::new(MemoryBlobStore::default());
    let board = Board::new(
        Collaborators {
            store: store.clone(),
            identity: Arc::new(identity),
            blobs: blobs.clone(),
        },
        Calendar::utc(),
    );
    Harness {
        store,
        blobs,
        board,
    }
}

async fn signed_in() -> Harness {
    let mut h = harness_with(MemoryTaskStore::new(), MemoryIdentity::signed_in(user()));
    h.board.load(now()).await.expect("load board");
    h
}

fn draft(title: &str, due: Option<DateTime<Utc>>) -> TaskDraft {
    TaskDraft {
        title: title.to_string(),
        description: None,
        due_date: due,
    }
}

fn stored(h: &Harness, id: &TaskId) -> Task {
    h.store
        .snapshot()
        .into_iter()
        .find(|task| &task.id == id)
        .expect("task in store")
}

fn drop_event(id: &TaskId, from: &str, to: &str) -> DropEvent {
    DropEvent {
        task_id: id.clone(),
        source: DropSlot::new(from, 0),
        destination: Some(DropSlot::new(to, 0)),
    }
}

#[tokio::test]
async fn loading_without_a_session_is_blocked() {
    let mut h = harness_with(MemoryTaskStore::new(), MemoryIdentity::anonymous());
    let err = h.board.load(now()).await.expect_err("no session");
    assert!(matches!(err, BoardError::NotAuthenticated));

    let notices = h.board.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);

    let err = h
        .board
        .add_task(draft("Buy milk", None), None, now())
        .await
        .expect_err("no session");
    assert!(matches!(err, BoardError::NotAuthenticated));
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn added_task_lands_in_the_mirror_and_the_store() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(draft("Buy milk", Some(at(10, 18))), None, now())
        .await
        .expect("add task");

    assert_eq!(task.user_id, UserId::from("u1"));
    assert!(!task.completed);
    assert_eq!(h.board.mirror().get(&task.id), Some(&task));
    assert_eq!(stored(&h, &task.id), task);

    let notices = h.board.take_notices();
    assert_eq!(notices[0].message, "Task added");
    assert_eq!(h.board.grouped(now())[&Bucket::Today].tasks, vec![task]);
}

#[tokio::test]
async fn image_goes_to_the_user_folder() {
    let mut h = signed_in().await;
    let image = ImageUpload::new("receipt.png", b"png".to_vec());
    let task = h
        .board
        .add_task(draft("Pay rent", None), Some(image), now())
        .await
        .expect("add task");

    let path = format!("u1/todo-{}.png", now().timestamp_millis());
    assert!(h.blobs.contains(&path));
    assert_eq!(
        task.image_url.as_deref(),
        Some(format!("memory://todo-images/{path}").as_str())
    );
}

#[tokio::test]
async fn failed_upload_retries_at_the_bucket_root() {
    let mut h = signed_in().await;
    h.blobs.fail_next_uploads(1);
    let image = ImageUpload::new("receipt.png", b"png".to_vec());
    let task = h
        .board
        .add_task(draft("Pay rent", None), Some(image), now())
        .await
        .expect("add task");

    let paths = h.blobs.paths();
    assert_eq!(paths.len(), 1);
    let prefix = format!("todo-{}-", now().timestamp_millis());
    assert!(paths[0].starts_with(&prefix), "{paths:?}");
    assert!(paths[0].ends_with(".png"));
    assert!(task.image_url.is_some());
}

#[tokio::test]
async fn task_is_saved_without_image_when_uploads_fail() {
    let mut h = signed_in().await;
    h.blobs.fail_next_uploads(2);
    let image = ImageUpload::new("receipt.png", b"png".to_vec());
    let task = h
        .board
        .add_task(draft("Pay rent", None), Some(image), now())
        .await
        .expect("task still added");

    assert_eq!(task.image_url, None);
    let levels: Vec<NoticeLevel> = h.board.take_notices().iter().map(|n| n.level).collect();
    assert_eq!(levels, vec![NoticeLevel::Warning, NoticeLevel::Success]);
}

#[tokio::test]
async fn insert_is_retried_without_the_image() {
    let mut h = signed_in().await;
    h.store.fail_next(StoreOp::Insert, 1);
    let image = ImageUpload::new("receipt.png", b"png".to_vec());
    let task = h
        .board
        .add_task(draft("Pay rent", None), Some(image), now())
        .await
        .expect("second insert succeeds");

    assert_eq!(task.image_url, None);
    assert_eq!(h.store.snapshot().len(), 1);
    let notices = h.board.take_notices();
    assert_eq!(notices.last().expect("notice").message, "Task added, but without the image");
}

#[tokio::test]
async fn status_drop_completes_and_keeps_due_date() {
    let mut h = signed_in().await;
    let due = at(12, 9);
    let task = h
        .board
        .add_task(draft("Buy milk", Some(due)), None, now())
        .await
        .expect("add task");
    h.board.take_notices();

    h.board.set_view(ViewKind::Status);
    let plan = h
        .board
        .on_drop(&drop_event(&task.id, "pending", "completed"), now())
        .await
        .expect("drop");
    assert_eq!(plan, DropPlan::SetCompleted(true));

    let mirrored = h.board.mirror().get(&task.id).expect("mirrored");
    assert!(mirrored.completed);
    assert_eq!(mirrored.due_date, Some(due));
    let persisted = stored(&h, &task.id);
    assert!(persisted.completed);
    assert_eq!(persisted.due_date, Some(due));
    assert_eq!(h.board.take_notices()[0].message, "Task completed");
    assert_eq!(h.board.status_split(now()).completed.len(), 1);
}

#[tokio::test]
async fn due_drop_into_tomorrow_sets_start_of_next_day() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(draft("Buy milk", Some(at(10, 18))), None, now())
        .await
        .expect("add task");

    h.board.set_view(ViewKind::DueDate);
    h.board
        .on_drop(&drop_event(&task.id, "today", "tomorrow"), now())
        .await
        .expect("drop");

    let expected = Some(at(11, 0));
    assert_eq!(h.board.mirror().get(&task.id).expect("mirrored").due_date, expected);
    assert_eq!(stored(&h, &task.id).due_date, expected);
    assert!(h.board.grouped(now()).contains_key(&Bucket::Tomorrow));
}

#[tokio::test]
async fn drop_into_overdue_changes_nothing() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(draft("Buy milk", Some(at(10, 18))), None, now())
        .await
        .expect("add task");
    h.board.set_view(ViewKind::DueDate);

    let plan = h
        .board
        .on_drop(&drop_event(&task.id, "today", "overdue"), now())
        .await
        .expect("drop");
    assert_eq!(plan, DropPlan::Ignore(IgnoreReason::OverdueTarget));
    assert_eq!(stored(&h, &task.id), task);
}

#[tokio::test]
async fn failed_write_rolls_the_drop_back() {
    let mut h = signed_in().await;
    let due = at(10, 18);
    let task = h
        .board
        .add_task(draft("Buy milk", Some(due)), None, now())
        .await
        .expect("add task");
    h.board.take_notices();

    h.store.fail_next(StoreOp::Update, 1);
    // the re-read fails too, so only the rollback restores the mirror
    h.store.fail_next(StoreOp::Select, 1);
    h.board.set_view(ViewKind::DueDate);
    let err = h
        .board
        .on_drop(&drop_event(&task.id, "today", "nextWeek"), now())
        .await
        .expect_err("store failure");
    assert!(err.is_transient());

    assert_eq!(h.board.mirror().get(&task.id).expect("mirrored").due_date, Some(due));
    assert_eq!(stored(&h, &task.id).due_date, Some(due));
    let notices = h.board.take_notices();
    assert!(notices.iter().all(|n| n.level == NoticeLevel::Error));
    assert_eq!(notices[0].message, "Could not move task. Try again.");
}

#[tokio::test]
async fn drop_of_an_unknown_task_is_ignored() {
    let mut h = signed_in().await;
    let plan = h
        .board
        .on_drop(&drop_event(&TaskId::from("ghost"), "pending", "completed"), now())
        .await
        .expect("drop");
    assert_eq!(plan, DropPlan::Ignore(IgnoreReason::MissingTask));
}

#[tokio::test]
async fn toggle_round_trip() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(draft("Buy milk", None), None, now())
        .await
        .expect("add task");

    assert!(h.board.set_completed(&task.id, true, now()).await.expect("done"));
    assert!(stored(&h, &task.id).completed);
    assert!(h.board.set_completed(&task.id, false, now()).await.expect("reopen"));
    assert!(!stored(&h, &task.id).completed);
}

#[tokio::test]
async fn editing_another_users_task_is_forbidden() {
    let mut h = signed_in().await;
    let theirs = NewTask::pending("Their task", None, None, UserId::from("u2"))
        .expect("valid task")
        .into_task(TaskId::from("theirs"), now());
    h.store.seed(theirs.clone());

    let edit = TaskEdit::from_task(&theirs);
    let err = h
        .board
        .edit_task(&theirs.id, edit, ImageChange::Keep, now())
        .await
        .expect_err("forbidden");
    assert!(matches!(err, BoardError::Forbidden(_)));

    let err = h.board.delete_task(&theirs.id).await.expect_err("forbidden");
    assert!(matches!(err, BoardError::Forbidden(_)));
    assert_eq!(stored(&h, &theirs.id), theirs);
}

#[tokio::test]
async fn edit_replaces_and_removes_images() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(
            draft("Pay rent", None),
            Some(ImageUpload::new("a.png", b"a".to_vec())),
            now(),
        )
        .await
        .expect("add task");
    let first = format!("u1/todo-{}.png", now().timestamp_millis());
    assert!(h.blobs.contains(&first));

    let mut edit = TaskEdit::from_task(&task);
    edit.title = "Pay rent today".to_string();
    edit.due_date = Some(at(10, 20));
    h.board
        .edit_task(
            &task.id,
            edit,
            ImageChange::Replace(ImageUpload::new("b.jpg", b"b".to_vec())),
            now(),
        )
        .await
        .expect("edit");

    let second = format!("u1/todo-edit-{}.jpg", now().timestamp_millis());
    assert!(!h.blobs.contains(&first));
    assert!(h.blobs.contains(&second));
    let edited = h.board.mirror().get(&task.id).expect("mirrored").clone();
    assert_eq!(edited.title, "Pay rent today");
    assert_eq!(edited.due_date, Some(at(10, 20)));
    assert!(edited.image_url.as_deref().is_some_and(|url| url.ends_with(&second)));

    h.board
        .edit_task(&task.id, TaskEdit::from_task(&edited), ImageChange::Remove, now())
        .await
        .expect("edit");
    assert!(h.blobs.paths().is_empty());
    assert_eq!(stored(&h, &task.id).image_url, None);
}

#[tokio::test]
async fn image_failure_on_edit_keeps_the_old_image() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(
            draft("Pay rent", None),
            Some(ImageUpload::new("a.png", b"a".to_vec())),
            now(),
        )
        .await
        .expect("add task");
    h.board.take_notices();

    h.blobs.fail_next_uploads(1);
    let mut edit = TaskEdit::from_task(&task);
    edit.title = "Pay rent now".to_string();
    h.board
        .edit_task(
            &task.id,
            edit,
            ImageChange::Replace(ImageUpload::new("b.png", b"b".to_vec())),
            now(),
        )
        .await
        .expect("edit still succeeds");

    let persisted = stored(&h, &task.id);
    assert_eq!(persisted.title, "Pay rent now");
    assert_eq!(persisted.image_url, task.image_url);
    let levels: Vec<NoticeLevel> = h.board.take_notices().iter().map(|n| n.level).collect();
    assert_eq!(levels, vec![NoticeLevel::Error, NoticeLevel::Success]);
}

#[tokio::test]
async fn delete_removes_image_and_row_even_if_blob_removal_fails() {
    let mut h = signed_in().await;
    let task = h
        .board
        .add_task(
            draft("Pay rent", None),
            Some(ImageUpload::new("a.png", b"a".to_vec())),
            now(),
        )
        .await
        .expect("add task");
    let other = h
        .board
        .add_task(
            draft("Buy milk", None),
            Some(ImageUpload::new("b.png", b"b".to_vec())),
            now() + chrono::Duration::milliseconds(1),
        )
        .await
        .expect("add task");

    h.board.delete_task(&task.id).await.expect("delete");
    assert!(h.board.mirror().get(&task.id).is_none());
    assert_eq!(h.blobs.paths().len(), 1);

    h.blobs.fail_next_removes(1);
    h.board.delete_task(&other.id).await.expect("delete");
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn pushed_changes_reach_the_mirror() {
    let mut h = signed_in().await;
    let mine = h
        .store
        .insert(NewTask::pending("From another tab", None, None, UserId::from("u1")).expect("valid"))
        .await
        .expect("insert");
    h.store
        .insert(NewTask::pending("Someone else", None, None, UserId::from("u2")).expect("valid"))
        .await
        .expect("insert");

    assert_eq!(h.board.sync_changes(now()).await.expect("sync"), 1);
    assert_eq!(h.board.mirror().len(), 1);

    h.store.delete(&mine.id).await.expect("delete");
    h.board.sync_changes(now()).await.expect("sync");
    assert!(h.board.mirror().is_empty());
}

#[tokio::test]
async fn lagging_feed_falls_back_to_a_full_read() {
    let mut h = harness_with(
        MemoryTaskStore::with_feed_capacity(2),
        MemoryIdentity::signed_in(user()),
    );
    h.board.load(now()).await.expect("load");

    for idx in 0..5 {
        h.store
            .insert(
                NewTask::pending(&format!("task {idx}"), None, None, UserId::from("u1"))
                    .expect("valid"),
            )
            .await
            .expect("insert");
    }

    h.board.sync_changes(now()).await.expect("sync");
    assert_eq!(h.board.mirror().len(), 5);
}

#[tokio::test]
async fn filters_and_search_compose() {
    let mut h = signed_in().await;
    for (title, due) in [
        ("Buy Milk", Some(at(10, 18))),
        ("Walk dog", Some(at(10, 19))),
        ("Old milk receipt", Some(at(5, 9))),
        ("Someday milk", None),
    ] {
        h.board
            .add_task(draft(title, due), None, now())
            .await
            .expect("add task");
    }

    h.board
        .set_filter(DateFilter::new(DateFilterKind::Today), now())
        .await
        .expect("filter");
    // today is pushed down to the store read
    assert_eq!(h.board.mirror().len(), 2);

    h.board.set_search("MILK");
    let titles: Vec<String> = h.board.visible(now()).into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["Buy Milk".to_string()]);

    h.board.set_search("");
    h.board
        .set_filter(DateFilter::new(DateFilterKind::Overdue), now())
        .await
        .expect("filter");
    let titles: Vec<String> = h.board.visible(now()).into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["Old milk receipt".to_string()]);
}

#[tokio::test]
async fn sign_out_clears_the_board() {
    let mut h = signed_in().await;
    h.board
        .add_task(draft("Buy milk", None), None, now())
        .await
        .expect("add task");
    h.board.sign_out().await.expect("sign out");
    assert!(h.board.user().is_none());
    assert!(h.board.mirror().is_empty());
    assert!(matches!(
        h.board.refresh(now()).await,
        Err(BoardError::NotAuthenticated)
    ));
}
