use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use lamco_clipboard_transfer::path::{path_to_uri, uri_to_path};
use lamco_clipboard_transfer::{
    ConflictPolicy, Config, CopyOrchestrator, PasteData, PasteRecord, ProgressInfo,
    ProgressListener, RecordOutcome, RecordSet, RemoteError, RemoteTransferService,
    SessionCallback, TransferConfig, TransferParams, TransferStatus,
};
use tempfile::TempDir;

/// Writes fixed bytes into the requested destination from its own thread
struct ThreadedService {
    payload: Vec<u8>,
    cancelled: Mutex<Vec<String>>,
}

impl RemoteTransferService for ThreadedService {
    fn prepare_session(
        &self,
        _src_uri: &str,
        dest_uri: &str,
        _routing_id: &str,
        callback: Arc<SessionCallback>,
    ) -> Result<(), RemoteError> {
        let dest = PathBuf::from(uri_to_path(dest_uri));
        let payload = self.payload.clone();
        thread::spawn(move || {
            let total = payload.len() as u64;
            callback.on_file_receive(total, total / 2);
            if fs::write(&dest, &payload).is_err() {
                callback.on_failed("threaded", 5);
                return;
            }
            callback.on_file_receive(total, total);
            callback.on_finished("threaded");
        });
        Ok(())
    }

    fn cancel_transfer(&self, src_uri: &str, _dest_uri: &str) -> Result<(), RemoteError> {
        self.cancelled.lock().unwrap().push(src_uri.to_string());
        Ok(())
    }
}

/// Rejects every session synchronously
struct RejectingService;

impl RemoteTransferService for RejectingService {
    fn prepare_session(
        &self,
        _src_uri: &str,
        _dest_uri: &str,
        _routing_id: &str,
        _callback: Arc<SessionCallback>,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::Rejected(9))
    }

    fn cancel_transfer(&self, _src_uri: &str, _dest_uri: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    out: PathBuf,
    config: TransferConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let toml = format!(
            r#"
            [transfer]
            staging_root = "{}"
            poll_interval_ms = 5
            cancel_poll_interval_ms = 10
            "#,
            dir.path().join("staging").display()
        );
        let config = Config::from_toml(&toml).unwrap().transfer;

        Self { dir, out, config }
    }

    fn source(&self, name: &str, len: usize) -> PathBuf {
        let path = self.dir.path().join("src").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(&path, data).unwrap();
        path
    }

    fn staging_is_empty(&self) -> bool {
        fs::read_dir(&self.config.staging_root)
            .map(|mut d| d.next().is_none())
            .unwrap_or(true)
    }
}

fn uri(path: &Path) -> String {
    path_to_uri("docs", path)
}

fn recording_listener() -> (ProgressListener, Arc<Mutex<Vec<u32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: ProgressListener = Arc::new(move |info: ProgressInfo| {
        sink.lock().unwrap().push(info.percentage);
    });
    (listener, seen)
}

fn assert_monotonic_to_100(seen: &[u32]) {
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "not monotonic: {seen:?}");
    assert_eq!(seen.last().copied(), Some(100));
}

#[test]
fn test_three_local_records_overwrite() {
    let fx = Fixture::new();
    let sources: Vec<PathBuf> = ["a.txt", "b.bin", "c.dat"]
        .iter()
        .enumerate()
        .map(|(i, name)| fx.source(name, 10_000 * (i + 1)))
        .collect();
    let mut data = PasteData::new(sources.iter().map(|s| PasteRecord::uri(uri(s))).collect());

    let (listener, seen) = recording_listener();
    let params = TransferParams::new(uri(&fx.out))
        .with_conflict_policy(ConflictPolicy::Overwrite)
        .with_progress_listener(listener);

    let report = CopyOrchestrator::new(fx.config.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.status, TransferStatus::Completed);
    assert_eq!(report.copied(), 3);
    assert_eq!(data.record_count(), 3);
    for (record, src) in data.records.iter().zip(&sources) {
        let dest = uri_to_path(record.uri.as_deref().unwrap());
        assert_eq!(fs::read(&dest).unwrap(), fs::read(src).unwrap());
    }
    assert_monotonic_to_100(&seen.lock().unwrap());
}

#[test]
fn test_overwrite_replaces_existing_destination() {
    let fx = Fixture::new();
    let src = fx.source("report.txt", 20_000);
    fs::write(fx.out.join("report.txt"), b"stale contents that are longer than nothing").unwrap();

    let mut data = PasteData::new(vec![PasteRecord::uri(uri(&src))]);
    let params =
        TransferParams::new(uri(&fx.out)).with_conflict_policy(ConflictPolicy::Overwrite);

    let report = CopyOrchestrator::new(fx.config.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.copied(), 1);
    assert_eq!(report.skipped(), 0);
    assert_eq!(data.uris(), vec![uri(&fx.out.join("report.txt")).as_str()]);
    assert_eq!(
        fs::read(fx.out.join("report.txt")).unwrap(),
        fs::read(&src).unwrap()
    );
}

#[test]
fn test_skip_existing_destination() {
    let fx = Fixture::new();
    let first = fx.source("first.txt", 64);
    let second = fx.source("second.txt", 128);
    fs::write(fx.out.join("first.txt"), b"already here").unwrap();
    let original_source = fs::read(&first).unwrap();

    let mut data = PasteData::new(vec![
        PasteRecord::uri(uri(&first)),
        PasteRecord::uri(uri(&second)),
    ]);
    let params = TransferParams::new(uri(&fx.out)).with_conflict_policy(ConflictPolicy::Skip);

    let report = CopyOrchestrator::new(fx.config.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(data.uris(), vec![uri(&fx.out.join("second.txt")).as_str()]);
    assert_eq!(fs::read(fx.out.join("first.txt")).unwrap(), b"already here");
    assert_eq!(fs::read(&first).unwrap(), original_source);
}

#[test]
fn test_skip_is_idempotent() {
    let fx = Fixture::new();
    let src = fx.source("once.txt", 256);
    let params = TransferParams::new(uri(&fx.out)).with_conflict_policy(ConflictPolicy::Skip);
    let orchestrator = CopyOrchestrator::new(fx.config.clone());

    let mut data = PasteData::new(vec![PasteRecord::uri(uri(&src))]);
    orchestrator.copy(&mut data, &params).unwrap();
    let modified = fs::metadata(fx.out.join("once.txt")).unwrap().modified().unwrap();

    let mut again = PasteData::new(vec![PasteRecord::uri(uri(&src))]);
    let report = orchestrator.copy(&mut again, &params).unwrap();

    assert_eq!(report.skipped(), 1);
    assert_eq!(again.record_count(), 0);
    assert_eq!(
        fs::metadata(fx.out.join("once.txt")).unwrap().modified().unwrap(),
        modified
    );
}

#[test]
fn test_remote_prepare_failure_drops_record() {
    let fx = Fixture::new();
    let remote = fx.source("remote.bin", 512);
    let local = fx.source("local.bin", 512);

    let mut data = PasteData::new(vec![
        PasteRecord::uri(format!("{}?networkid=peer-2", uri(&remote))),
        PasteRecord::uri(uri(&local)),
    ]);
    let (listener, seen) = recording_listener();
    let params = TransferParams::new(uri(&fx.out)).with_progress_listener(listener);

    let report = CopyOrchestrator::new(fx.config.clone())
        .with_remote_service(Arc::new(RejectingService))
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.status, TransferStatus::Completed);
    assert!(matches!(report.records[0].outcome, RecordOutcome::Failed(_)));
    assert_eq!(data.uris(), vec![uri(&fx.out.join("local.bin")).as_str()]);
    assert!(!fx.out.join("remote.bin").exists());
    assert!(fx.staging_is_empty());
    assert_monotonic_to_100(&seen.lock().unwrap());
}

#[test]
fn test_remote_transfer_through_staging() {
    let fx = Fixture::new();
    let remote = fx.source("photo.jpg", 2048);
    let service = Arc::new(ThreadedService {
        payload: b"bytes from the other device".to_vec(),
        cancelled: Mutex::new(Vec::new()),
    });

    let mut data = PasteData::new(vec![PasteRecord::uri(format!(
        "{}?networkid=peer-3",
        uri(&remote)
    ))]);
    let (listener, seen) = recording_listener();
    let params = TransferParams::new(uri(&fx.out)).with_progress_listener(listener);

    let report = CopyOrchestrator::new(fx.config.clone())
        .with_remote_service(service.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.copied(), 1);
    assert_eq!(
        fs::read(fx.out.join("photo.jpg")).unwrap(),
        b"bytes from the other device"
    );
    assert!(fx.staging_is_empty());
    assert!(service.cancelled.lock().unwrap().is_empty());
    assert_monotonic_to_100(&seen.lock().unwrap());
}

#[test]
fn test_cancel_after_second_of_five_records() {
    let fx = Fixture::new();
    let sources: Vec<PathBuf> = (1..=5)
        .map(|i| fx.source(&format!("file{i}.txt"), 4096))
        .collect();
    let mut data = PasteData::new(sources.iter().map(|s| PasteRecord::uri(uri(s))).collect());

    // Record 2 of 5 completing reports 20 + 0.8 * 40 = 52.
    let flag = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener: ProgressListener = {
        let flag = Arc::clone(&flag);
        let seen = Arc::clone(&seen);
        Arc::new(move |info: ProgressInfo| {
            seen.lock().unwrap().push(info.percentage);
            if (52..100).contains(&info.percentage) {
                flag.store(true, Ordering::SeqCst);
            }
        })
    };
    let hook_flag = Arc::clone(&flag);
    let params = TransferParams::new(uri(&fx.out))
        .with_progress_listener(listener)
        .with_cancel_hook(Arc::new(move || hook_flag.load(Ordering::SeqCst)));

    let report = CopyOrchestrator::new(fx.config.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.status, TransferStatus::Cancelled);
    assert_eq!(report.copied(), 2);
    assert_eq!(report.cancelled(), 3);
    assert_eq!(
        data.uris(),
        vec![
            uri(&fx.out.join("file1.txt")).as_str(),
            uri(&fx.out.join("file2.txt")).as_str()
        ]
    );
    for i in 3..=5 {
        assert!(!fx.out.join(format!("file{i}.txt")).exists());
    }
    assert_monotonic_to_100(&seen.lock().unwrap());
}

#[test]
fn test_cancel_before_start_empties_set() {
    let fx = Fixture::new();
    let src = fx.source("never.txt", 32);
    let mut data = PasteData::new(vec![PasteRecord::uri(uri(&src))]);
    let (listener, seen) = recording_listener();
    let params = TransferParams::new(uri(&fx.out))
        .with_progress_listener(listener)
        .with_cancel_hook(Arc::new(|| true));

    let report = CopyOrchestrator::new(fx.config.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.status, TransferStatus::Cancelled);
    assert_eq!(data.record_count(), 0);
    assert_eq!(seen.lock().unwrap().last().copied(), Some(100));
}

#[test]
fn test_directory_record_copies_tree() {
    let fx = Fixture::new();
    let tree = fx.dir.path().join("src").join("album");
    fs::create_dir_all(tree.join("2024/summer")).unwrap();
    fs::write(tree.join("cover.png"), vec![1u8; 3000]).unwrap();
    fs::write(tree.join("2024/summer/beach.jpg"), vec![2u8; 50_000]).unwrap();
    fs::write(tree.join("2024/empty.txt"), b"").unwrap();

    let mut data = PasteData::new(vec![PasteRecord::uri(uri(&tree))]);
    let (listener, seen) = recording_listener();
    let params = TransferParams::new(uri(&fx.out)).with_progress_listener(listener);

    let report = CopyOrchestrator::new(fx.config.clone())
        .copy(&mut data, &params)
        .unwrap();

    assert_eq!(report.copied(), 1);
    let copied = fx.out.join("album");
    assert_eq!(fs::read(copied.join("cover.png")).unwrap(), vec![1u8; 3000]);
    assert_eq!(
        fs::read(copied.join("2024/summer/beach.jpg")).unwrap(),
        vec![2u8; 50_000]
    );
    assert!(copied.join("2024/empty.txt").is_file());
    assert_monotonic_to_100(&seen.lock().unwrap());
}
