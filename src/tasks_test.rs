use std::sync::Arc;

use serde_json::{Map, json};
use time::macros::date;

use super::*;
use crate::remote::mock::{MockRemote, Op};

fn owner() -> Session {
    Session::new("u1", Some("a@b.com".into()), Map::new()).unwrap()
}

fn service(remote: &Arc<MockRemote>) -> TaskService {
    TaskService::new(SessionStore::new(remote.clone(), Some(owner())))
}

fn task_row(id: &str, priority: &str, due: Option<&str>, created: &str) -> Value {
    json!({
        "id": id,
        "title": id,
        "priority": priority,
        "due_date": due,
        "user_id": "u1",
        "is_shared": false,
        "completed": false,
        "created_at": created,
        "updated_at": created,
    })
}

// =============================================================================
// Drafts
// =============================================================================

#[test]
fn draft_trims_and_normalizes_fields() {
    let draft = TaskDraft {
        title: "  Buy milk ".into(),
        description: "   ".into(),
        priority: Priority::High,
        due_date: "2026-03-01".into(),
        tags: " home, , errands ,".into(),
        is_shared: false,
    };
    let task = draft.into_new_task(&owner()).unwrap();
    assert_eq!(task.title, "Buy milk");
    assert!(task.description.is_none());
    assert_eq!(task.priority, Priority::High);
    assert_eq!(task.due_date, Some(date!(2026 - 03 - 01)));
    assert_eq!(task.tags, Some(vec!["home".to_owned(), "errands".to_owned()]));
    assert_eq!(task.user_id, "u1");
}

#[test]
fn draft_requires_title() {
    let draft = TaskDraft::titled("   ");
    assert_eq!(draft.into_new_task(&owner()), Err(DraftError::MissingTitle));
}

#[test]
fn draft_rejects_malformed_due_date() {
    let draft = TaskDraft { due_date: "03/01/2026".into(), ..TaskDraft::titled("x") };
    assert_eq!(draft.into_new_task(&owner()), Err(DraftError::InvalidDueDate("03/01/2026".into())));

    let draft = TaskDraft { due_date: "2026-02-30".into(), ..TaskDraft::titled("x") };
    assert!(matches!(draft.into_new_task(&owner()), Err(DraftError::InvalidDueDate(_))));
}

#[test]
fn blank_tags_become_none() {
    assert_eq!(parse_tags(""), None);
    assert_eq!(parse_tags(" , ,"), None);
    assert_eq!(parse_tags("a"), Some(vec!["a".to_owned()]));
}

#[test]
fn default_draft_is_medium_priority() {
    let task = TaskDraft::titled("x").into_new_task(&owner()).unwrap();
    assert_eq!(task.priority, Priority::Medium);
    assert!(task.due_date.is_none());
    assert!(task.tags.is_none());
    assert!(!task.is_shared);
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn sort_puts_high_priority_then_due_then_newest() {
    let rows = [
        task_row("low", "low", None, "2026-01-05T00:00:00Z"),
        task_row("high-undated", "high", None, "2026-01-01T00:00:00Z"),
        task_row("high-late", "high", Some("2026-05-01"), "2026-01-01T00:00:00Z"),
        task_row("high-soon", "high", Some("2026-02-01"), "2026-01-01T00:00:00Z"),
        task_row("medium-old", "medium", None, "2026-01-01T00:00:00Z"),
        task_row("medium-new", "medium", None, "2026-01-03T00:00:00Z"),
    ];
    let mut tasks: Vec<Task> = rows.into_iter().map(|r| decode_record(r).unwrap()).collect();
    sort_tasks(&mut tasks);
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["high-soon", "high-late", "high-undated", "medium-new", "medium-old", "low"]);
}

// =============================================================================
// Service
// =============================================================================

#[tokio::test]
async fn list_filters_by_owner_and_view() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Tasks, task_row("mine", "low", None, "2026-01-01T00:00:00Z"));
    let mut shared = task_row("shared", "low", None, "2026-01-01T00:00:00Z");
    shared["is_shared"] = json!(true);
    remote.seed(Collection::Tasks, shared);
    let mut theirs = task_row("theirs", "low", None, "2026-01-01T00:00:00Z");
    theirs["user_id"] = json!("u2");
    remote.seed(Collection::Tasks, theirs);

    let tasks = service(&remote);
    let personal = tasks.list(TaskView::Personal).await.unwrap();
    assert_eq!(personal.len(), 1);
    assert_eq!(personal[0].id, "mine");

    let shared = tasks.list(TaskView::Shared).await.unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].id, "shared");
}

#[tokio::test]
async fn create_inserts_owned_task() {
    let remote = Arc::new(MockRemote::new());
    let tasks = service(&remote);

    let draft = TaskDraft { tags: "work".into(), ..TaskDraft::titled("Write report") };
    let task = tasks.create(draft).await.unwrap();
    assert_eq!(task.title, "Write report");
    assert_eq!(task.user_id, "u1");
    assert!(!task.completed);

    let stored = remote.records(Collection::Tasks);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["priority"], "medium");
    assert_eq!(stored[0]["tags"], json!(["work"]));
}

#[tokio::test]
async fn create_with_invalid_draft_sends_nothing() {
    let remote = Arc::new(MockRemote::new());
    let tasks = service(&remote);
    let result = tasks.create(TaskDraft::default()).await;
    assert_eq!(result.unwrap_err(), TaskError::Draft(DraftError::MissingTitle));
    assert_eq!(remote.call_count(Op::Insert), 0);
}

#[tokio::test]
async fn operations_require_session() {
    let remote = Arc::new(MockRemote::new());
    let tasks = TaskService::new(SessionStore::new(remote.clone(), None));
    let unauthenticated = TaskError::Remote(StoreError::Unauthenticated);

    assert_eq!(tasks.list(TaskView::Personal).await.unwrap_err(), unauthenticated);
    assert_eq!(tasks.create(TaskDraft::titled("x")).await.unwrap_err(), unauthenticated);
    assert_eq!(tasks.delete("t1").await.unwrap_err(), unauthenticated);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn toggle_flips_completion_and_stamps_update() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Tasks, task_row("t1", "high", None, "2026-01-01T00:00:00Z"));
    let tasks = service(&remote);

    let task = tasks.get("t1").await.unwrap().unwrap();
    let toggled = tasks.toggle_complete(&task).await.unwrap();
    assert!(toggled.completed);
    assert!(toggled.updated_at > task.updated_at);

    let again = tasks.toggle_complete(&toggled).await.unwrap();
    assert!(!again.completed);
}

#[tokio::test]
async fn update_sends_only_patched_fields() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Tasks, task_row("t1", "low", Some("2026-02-01"), "2026-01-01T00:00:00Z"));
    let tasks = service(&remote);

    let patch = TaskPatch { priority: Some(Priority::High), ..TaskPatch::default() };
    let task = tasks.update("t1", patch).await.unwrap();
    assert_eq!(task.priority, Priority::High);
    assert_eq!(task.due_date, Some(date!(2026 - 02 - 01)));
    assert_eq!(task.title, "t1");
}

#[tokio::test]
async fn update_of_missing_task_is_rejected() {
    let remote = Arc::new(MockRemote::new());
    let tasks = service(&remote);
    let result = tasks.set_completed("nope", true).await;
    assert!(matches!(result, Err(TaskError::Remote(StoreError::ValidationRejected(_)))));
}

#[tokio::test]
async fn delete_removes_task() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Tasks, task_row("t1", "low", None, "2026-01-01T00:00:00Z"));
    let tasks = service(&remote);
    tasks.delete("t1").await.unwrap();
    assert!(remote.records(Collection::Tasks).is_empty());
    assert_eq!(tasks.get("t1").await.unwrap(), None);
}

#[tokio::test]
async fn malformed_row_surfaces_as_remote_error() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Tasks, json!({ "id": "bad", "user_id": "u1", "is_shared": false }));
    let tasks = service(&remote);
    let result = tasks.list(TaskView::Personal).await;
    assert!(matches!(result, Err(TaskError::Remote(StoreError::RemoteUnavailable(_)))));
}

#[tokio::test]
async fn list_failure_is_reported() {
    let remote = Arc::new(MockRemote::new());
    remote.fail(Op::Select, RemoteError::Request("timeout".into()));
    let tasks = service(&remote);
    assert!(matches!(tasks.list(TaskView::Personal).await, Err(TaskError::Remote(_))));
}
