use async_trait::async_trait;
use asbackup_s3::{
    config::BackupSet,
    errors::BackupError,
    services::{
        backup_service::{BackupService, BackupTarget, VerifyOutcome},
        dump::{DumpError, DumpRequest, DumpTool},
        memory_store::{MemoryStore, UploadFault},
        notifier::{Notifier, NotifyError},
        part_sizer::CandidatePartSizer,
        reconciler::ChecksumReconciler,
    },
};
use chrono::{Datelike, Duration, Utc};
use std::{
    collections::BTreeSet,
    path::Path,
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

const BUCKET: &str = "backup";
const PART_SIZE: usize = 1024;

/// Writes a fixed payload instead of running a real dump.
struct FakeDump {
    payload: Option<Vec<u8>>,
}

#[async_trait]
impl DumpTool for FakeDump {
    async fn dump(&self, request: &DumpRequest) -> Result<(), DumpError> {
        match &self.payload {
            Some(payload) => Ok(tokio::fs::write(&request.output, payload).await?),
            None => Err(DumpError::Io(std::io::Error::other("asbackup returned non zero code"))),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    status: u16,
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn answering(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            messages: Mutex::new(Vec::new()),
        })
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, text: &str) -> Result<u16, NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(self.status)
    }
}

struct Fixture {
    _dir: TempDir,
    set: BackupSet,
    store: MemoryStore,
    notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    fn new(store: MemoryStore, notifier_status: u16) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let set = BackupSet {
            nice: Some(30),
            local_path: dir.path().join("userdata"),
            s3_bucket: BUCKET.into(),
            s3_path: "prod/cluster".into(),
            remove_local: true,
            estimated_min_size: 100,
            estimated_max_size: 1_000_000,
            s3_store_months: 1,
            s3_store_days: BTreeSet::new(),
            dump_command: "asbackup".into(),
        };
        Self {
            _dir: dir,
            set,
            store,
            notifier: RecordingNotifier::answering(notifier_status),
        }
    }

    fn target(&self) -> BackupTarget<'_> {
        BackupTarget {
            host: "172.31.31.11",
            namespace: "userdata",
            set: &self.set,
        }
    }

    fn service(&self, payload: Option<Vec<u8>>) -> BackupService {
        let reconciler =
            ChecksumReconciler::new(CandidatePartSizer::default().extended([PART_SIZE as u64]));
        BackupService::new(
            Arc::new(self.store.clone()),
            self.notifier.clone(),
            Arc::new(FakeDump { payload }),
            true,
        )
        .with_reconciler(reconciler)
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}

#[tokio::test]
async fn create_uploads_verifies_and_reports() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE), 200);
    let now = Utc::now();

    let report = fx
        .service(Some(payload(5000)))
        .create(fx.target(), now, true)
        .await
        .unwrap();

    assert!(report.remote_key.starts_with("prod/cluster/userdata_"));
    assert!(report.remote_key.ends_with(".asbackup.gz"));
    assert_eq!(report.size_bytes, 5000);
    assert!(fx.store.contains(BUCKET, &report.remote_key));
    assert!(!report.local_path.exists(), "local copy should be removed");

    let messages = fx.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(
        messages[0].starts_with("Namespace userdata successfully backed up from host 172.31.31.11")
    );
}

#[tokio::test]
async fn create_prunes_in_dry_run_and_for_real() {
    let store = MemoryStore::new(PART_SIZE);
    let now = Utc::now();
    let milestone = now - Duration::days(20);
    let old = now - Duration::days(10);
    let ancient = milestone - Duration::days(40);
    store.insert(BUCKET, "prod/cluster/userdata_old.asbackup.gz", payload(200), old);
    store.insert(BUCKET, "prod/cluster/userdata_milestone.asbackup.gz", payload(200), milestone);
    store.insert(BUCKET, "prod/cluster/userdata_ancient.asbackup.gz", payload(200), ancient);
    store.insert(BUCKET, "prod/cluster/other_old.asbackup.gz", payload(200), old);

    let mut fx = Fixture::new(store, 200);
    fx.set.s3_store_days = BTreeSet::from([milestone.day()]);

    let dry = fx
        .service(Some(payload(3000)))
        .create(fx.target(), now, true)
        .await
        .unwrap();
    assert!(dry.prune.dry_run);
    assert_eq!(
        dry.prune.expired,
        vec![
            "prod/cluster/userdata_ancient.asbackup.gz".to_string(),
            "prod/cluster/userdata_old.asbackup.gz".to_string(),
        ]
    );
    assert!(dry.prune.deleted.is_empty());
    assert_eq!(fx.store.object_count(), 5);

    let real = fx
        .service(Some(payload(3000)))
        .create(fx.target(), now + Duration::seconds(1), false)
        .await
        .unwrap();
    assert_eq!(real.prune.deleted, real.prune.expired);
    assert!(!fx.store.contains(BUCKET, "prod/cluster/userdata_old.asbackup.gz"));
    assert!(!fx.store.contains(BUCKET, "prod/cluster/userdata_ancient.asbackup.gz"));
    assert!(fx.store.contains(BUCKET, "prod/cluster/userdata_milestone.asbackup.gz"));
    assert!(fx.store.contains(BUCKET, "prod/cluster/other_old.asbackup.gz"));
}

#[tokio::test]
async fn fresh_backup_survives_zero_month_pruning() {
    let store = MemoryStore::new(PART_SIZE);
    let now = Utc::now() - Duration::seconds(1);
    let old = now - Duration::days(2);
    store.insert(BUCKET, "prod/cluster/userdata_old.asbackup.gz", payload(200), old);

    let mut fx = Fixture::new(store, 200);
    fx.set.s3_store_months = 0;

    let report = fx
        .service(Some(payload(3000)))
        .create(fx.target(), now, false)
        .await
        .unwrap();

    assert_eq!(report.prune.deleted, vec!["prod/cluster/userdata_old.asbackup.gz".to_string()]);
    assert!(fx.store.contains(BUCKET, &report.remote_key));
    assert_eq!(fx.store.object_count(), 1);
}

#[tokio::test]
async fn missing_object_after_upload_exits_seven() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE).with_fault(UploadFault::Drop), 200);

    let err = fx
        .service(Some(payload(5000)))
        .create(fx.target(), Utc::now(), true)
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::NotUploaded { .. }));
    assert_eq!(err.exit_code(), 7);
    assert!(fx.notifier.messages()[0].contains("File does not exist on S3"));
}

#[tokio::test]
async fn corrupted_upload_exits_eight() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE).with_fault(UploadFault::Corrupt), 200);

    let err = fx
        .service(Some(payload(5000)))
        .create(fx.target(), Utc::now(), true)
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::ChecksumMismatch { .. }));
    assert_eq!(err.exit_code(), 8);
    assert_eq!(
        fx.notifier.messages(),
        vec!["[ERR] local md5 != remote md5 (172.31.31.11:userdata)".to_string()]
    );
}

#[tokio::test]
async fn dump_failure_exits_four() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE), 200);

    let err = fx
        .service(None)
        .create(fx.target(), Utc::now(), true)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 4);
    assert_eq!(fx.store.object_count(), 0);
    assert!(fx.notifier.messages()[0].contains("Can not create asbackup file"));
}

#[tokio::test]
async fn size_checks_exit_five_and_six() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE), 200);

    let small = fx
        .service(Some(payload(100)))
        .create(fx.target(), Utc::now(), true)
        .await
        .unwrap_err();
    assert_eq!(small.exit_code(), 5);

    let large = fx
        .service(Some(payload(1_000_001)))
        .create(fx.target(), Utc::now() + Duration::seconds(1), true)
        .await
        .unwrap_err();
    assert_eq!(large.exit_code(), 6);
    assert_eq!(fx.store.object_count(), 0);
}

#[tokio::test]
async fn webhook_failure_exits_eight() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE), 500);

    let err = fx
        .service(Some(payload(5000)))
        .create(fx.target(), Utc::now(), true)
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::ReportFailed(_)));
    assert_eq!(err.exit_code(), 8);
}

#[tokio::test]
async fn verify_tells_missing_from_corrupt() {
    let fx = Fixture::new(MemoryStore::new(PART_SIZE), 200);
    let service = fx.service(None);
    let local = fx._dir.path().join("local.gz");
    std::fs::write(&local, payload(4000)).unwrap();

    assert_eq!(
        service.verify_upload(BUCKET, "absent", &local).await.unwrap(),
        VerifyOutcome::NotFound
    );

    fx.store.insert(BUCKET, "good", payload(4000), Utc::now());
    assert_eq!(
        service.verify_upload(BUCKET, "good", &local).await.unwrap(),
        VerifyOutcome::Verified
    );

    fx.store.insert(BUCKET, "bad", payload(3999), Utc::now());
    assert!(matches!(
        service.verify_upload(BUCKET, "bad", &local).await.unwrap(),
        VerifyOutcome::Mismatch { .. }
    ));

    let missing_local = fx._dir.path().join("never-written.gz");
    let err = service
        .verify_upload(BUCKET, "good", Path::new(&missing_local))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Digest(_)));
}

#[tokio::test]
async fn list_is_sorted_and_get_downloads() {
    let store = MemoryStore::new(PART_SIZE).with_page_size(2);
    let now = Utc::now();
    for key in ["userdata_3", "userdata_1", "userdata_2"] {
        store.insert(BUCKET, &format!("prod/cluster/{}", key), key.as_bytes().to_vec(), now);
    }
    store.insert(BUCKET, "prod/cluster/trackdata_1", b"other".to_vec(), now);
    let fx = Fixture::new(store, 200);
    let service = fx.service(None);

    let keys: Vec<String> = service
        .list(fx.target())
        .await
        .unwrap()
        .into_iter()
        .map(|object| object.key)
        .collect();
    assert_eq!(
        keys,
        vec![
            "prod/cluster/userdata_1",
            "prod/cluster/userdata_2",
            "prod/cluster/userdata_3",
        ]
    );

    let destination = fx._dir.path().join("latest.asbackup.gz");
    service
        .get(fx.target(), "prod/cluster/userdata_2", &destination)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&destination).unwrap(), b"userdata_2");

    let err = service
        .get(fx.target(), "prod/cluster/userdata_9", &destination)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
