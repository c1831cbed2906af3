use crate::error::VigilError;
use crate::lifecycle::{
    JobStatus, JsonFileStore, MemoryStore, Operation, OperationField, OperationKind, RecordStore,
    Task, TaskField,
};
use crate::repo::{RepositoryField, RepositoryRecord};

fn exercise(store: &dyn RecordStore<Task>) {
    let mut first = Task {
        path: "/data".into(),
        ..Default::default()
    };
    let mut second = Task {
        path: "/home".into(),
        ..Default::default()
    };
    store.create(&mut first).unwrap();
    store.create(&mut second).unwrap();
    assert_eq!((first.id, second.id), (1, 2));

    let ids: Vec<u64> = store.list().unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![2, 1]);

    store.update_field(1, TaskField::Status(JobStatus::Running)).unwrap();
    let loaded = store.get(1).unwrap();
    assert_eq!(loaded.status, JobStatus::Running);
    assert!(loaded.updated_at >= loaded.created_at);

    second.path = "/srv".into();
    store.update(&second).unwrap();
    assert_eq!(store.get(2).unwrap().path, "/srv");

    store.delete(1).unwrap();
    assert!(matches!(
        store.get(1),
        Err(VigilError::RecordNotFound { collection: "tasks", id: 1 })
    ));
    assert!(store.delete(1).is_err());
    assert!(store.update_field(9, TaskField::ParentId("x".into())).is_err());
}

#[test]
fn memory_store_basics() {
    exercise(&MemoryStore::<Task>::new());
}

#[test]
fn json_store_basics() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::<Task>::open(dir.path()).unwrap();
    exercise(&store);
    store.flush().unwrap();
    let tasks = dir.path().join("tasks");
    assert!(!tasks.join("1.json").exists());
    assert!(tasks.join("2.json").exists());
    assert!(!tasks.join("2.tmp").exists());
}

#[test]
fn json_store_writes_only_the_changed_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::<Task>::open(dir.path()).unwrap();
    for path in ["/data", "/home"] {
        store
            .create(&mut Task {
                path: path.into(),
                ..Default::default()
            })
            .unwrap();
    }
    store.flush().unwrap();
    let untouched = dir.path().join("tasks").join("1.json");
    let before = std::fs::read(&untouched).unwrap();
    std::fs::remove_file(dir.path().join("tasks").join("2.json")).unwrap();

    for _ in 0..50 {
        store.update_field(2, TaskField::Status(JobStatus::Running)).unwrap();
    }
    store.flush().unwrap();
    assert_eq!(std::fs::read(&untouched).unwrap(), before);
    let rewritten: Task =
        serde_json::from_slice(&std::fs::read(dir.path().join("tasks").join("2.json")).unwrap()).unwrap();
    assert_eq!(rewritten.status, JobStatus::Running);
}

#[test]
fn json_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store: JsonFileStore<Operation> = JsonFileStore::open(dir.path()).unwrap();
        for kind in [OperationKind::Check, OperationKind::Prune] {
            let mut op = Operation {
                repository_id: 1,
                kind,
                ..Default::default()
            };
            store.create(&mut op).unwrap();
        }
        store.update_field(2, OperationField::Status(JobStatus::End)).unwrap();
    }

    let store: JsonFileStore<Operation> = JsonFileStore::open(dir.path()).unwrap();
    let ops = store.list().unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].kind, OperationKind::Prune);
    assert_eq!(ops[0].status, JobStatus::End);

    // Ids keep counting after the highest stored one.
    let mut op = Operation::default();
    store.create(&mut op).unwrap();
    assert_eq!(op.id, 3);
}

#[test]
fn collections_live_side_by_side() {
    let dir = tempfile::tempdir().unwrap();
    let repos: JsonFileStore<RepositoryRecord> = JsonFileStore::open(dir.path()).unwrap();
    let tasks: JsonFileStore<Task> = JsonFileStore::open(dir.path()).unwrap();

    let mut repo = RepositoryRecord {
        name: "main".into(),
        ..Default::default()
    };
    repos.create(&mut repo).unwrap();
    repos.update_field(repo.id, RepositoryField::Name("primary".into())).unwrap();
    tasks.create(&mut Task::default()).unwrap();

    repos.flush().unwrap();
    tasks.flush().unwrap();
    assert!(dir.path().join("repositories").join("1.json").exists());
    assert!(dir.path().join("tasks").join("1.json").exists());
    let reopened: JsonFileStore<RepositoryRecord> = JsonFileStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get(1).unwrap().name, "primary");
}

#[test]
fn corrupt_collection_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("tasks")).unwrap();
    std::fs::write(dir.path().join("tasks").join("4.json"), b"{not json").unwrap();
    let err = JsonFileStore::<Task>::open(dir.path()).err().unwrap();
    assert!(matches!(&err, VigilError::Store(m) if m.contains("4.json")));
}
