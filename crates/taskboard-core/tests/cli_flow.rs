use std::fs;

use taskboard_core::blobs::DirBlobStore;
use taskboard_core::cli::{Command, ListArgs};
use taskboard_core::commands::{CommandContext, dispatch};
use taskboard_core::config::Config;
use taskboard_core::datastore::JsonlTaskStore;
use taskboard_core::store::{IdentityProvider, TaskQuery, TaskStore};
use taskboard_core::task::{Task, UserId};
use tempfile::tempdir;

fn plain_config() -> Config {
    let mut cfg = Config::default();
    cfg.apply_overrides([("color".to_string(), "off".to_string())]);
    cfg
}

async fn run_command(data: &std::path::Path, command: Command) -> anyhow::Result<()> {
    let mut ctx = CommandContext::open(plain_config(), data)?;
    dispatch(&mut ctx, Some(command)).await
}

async fn stored_tasks(data: &std::path::Path, owner: &str) -> Vec<Task> {
    JsonlTaskStore::open(data)
        .expect("open store")
        .select(&TaskQuery::for_owner(UserId::from(owner)))
        .await
        .expect("select")
}

#[tokio::test]
async fn board_commands_persist_between_invocations() {
    let tmp = tempdir().expect("tempdir");
    let data = tmp.path();

    let err = run_command(data, Command::List(ListArgs::default()))
        .await
        .expect_err("no session yet");
    assert!(format!("{err:#}").contains("signed in"));

    run_command(
        data,
        Command::Login {
            user_id: "u1".to_string(),
            email: Some("ana@example.com".to_string()),
        },
    )
    .await
    .expect("login");

    let image_path = data.join("receipt.png");
    fs::write(&image_path, b"png").expect("write image");
    run_command(
        data,
        Command::Add {
            title: "Pay rent".to_string(),
            description: Some("<p>before friday</p>".to_string()),
            due: Some("tomorrow".to_string()),
            image: Some(image_path),
        },
    )
    .await
    .expect("add");

    let tasks = stored_tasks(data, "u1").await;
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert!(!task.completed);
    assert!(task.due_date.is_some());
    let url = task.image_url.clone().expect("image url");
    assert!(url.contains("/todo-images/u1/todo-"), "{url}");

    run_command(
        data,
        Command::Done {
            id: task.id.short().to_string(),
        },
    )
    .await
    .expect("done");
    assert!(stored_tasks(data, "u1").await[0].completed);

    run_command(data, Command::List(ListArgs::default()))
        .await
        .expect("list");

    run_command(
        data,
        Command::Delete {
            id: task.id.as_str().to_string(),
        },
    )
    .await
    .expect("delete");
    assert!(stored_tasks(data, "u1").await.is_empty());

    let blobs = DirBlobStore::open(data, "todo-images", None).expect("blobs");
    let u1_dir = blobs.root().join("u1");
    let leftover = fs::read_dir(&u1_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn logout_clears_the_session() {
    let tmp = tempdir().expect("tempdir");
    let data = tmp.path();

    run_command(
        data,
        Command::Login {
            user_id: "u1".to_string(),
            email: None,
        },
    )
    .await
    .expect("login");
    run_command(data, Command::Logout).await.expect("logout");

    let ctx = CommandContext::open(plain_config(), data).expect("open");
    assert_eq!(ctx.session.current_user().await.expect("session"), None);
}

#[tokio::test]
async fn move_into_overdue_is_refused_without_error() {
    let tmp = tempdir().expect("tempdir");
    let data = tmp.path();

    run_command(
        data,
        Command::Login {
            user_id: "u1".to_string(),
            email: None,
        },
    )
    .await
    .expect("login");
    run_command(
        data,
        Command::Add {
            title: "Walk dog".to_string(),
            description: None,
            due: Some("+3d".to_string()),
            image: None,
        },
    )
    .await
    .expect("add");
    let before = stored_tasks(data, "u1").await;

    run_command(
        data,
        Command::Move {
            id: before[0].id.short().to_string(),
            from: "thisWeek".to_string(),
            to: "overdue".to_string(),
            view: Some("due".to_string()),
            index: 0,
        },
    )
    .await
    .expect("move");
    assert_eq!(stored_tasks(data, "u1").await, before);
}
