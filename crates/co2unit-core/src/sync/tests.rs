use alloc::{
    collections::BTreeMap,
    format,
    string::{String, ToString},
    vec,
    vec::Vec,
};

use embassy_futures::block_on;

use super::*;
use crate::{
    fs::{FileSystem, MemoryFs},
    http::{HttpClient, HttpError, HttpResponse, Method},
    state_file,
    testing::FakePlatform,
};

const SERVER: &str = "http://srv";
const STATE: &str = "var/readings.json";

const PUSH: PushTarget<'static> = PushTarget {
    server: SERVER,
    local_dir: "data",
    remote_dir: "unit-7/data",
    state_path: STATE,
};

const PULL: PullTarget<'static> = PullTarget {
    server: SERVER,
    remote_dir: "updates",
    local_dir: "updates",
    tmp_prefix: "tmp-",
};

fn limits(chunk_size: u32) -> PushLimits {
    PushLimits {
        chunk_size,
        budget_ms: 120_000,
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Put {
    file: String,
    offset: u32,
    len: usize,
}

/// In-memory server speaking the push-sequential and listing protocol.
#[derive(Default)]
struct FakeServer {
    stored: BTreeMap<String, Vec<u8>>,
    puts: Vec<Put>,
    /// `(file, offset)` of every chunk the server stored.
    accepted: Vec<(String, u32)>,
    /// Chunks accepted before the server starts answering 503.
    accept_budget: Option<usize>,
    /// Extra `ack_file` body on the n-th accepted PUT.
    ack_on_put: Option<(usize, String, u32)>,
    gets: BTreeMap<String, (u16, Vec<u8>)>,
    get_log: Vec<String>,
}

impl FakeServer {
    fn stored(&self, file: &str) -> &[u8] {
        self.stored.get(file).map(Vec::as_slice).unwrap_or_default()
    }

    fn offsets(&self) -> Vec<u32> {
        self.puts.iter().map(|put| put.offset).collect()
    }

    fn serve(&mut self, path: &str, status: u16, body: &[u8]) {
        self.gets.insert(path.to_string(), (status, body.to_vec()));
    }

    fn ack_body(file: &str, offset: u32, size: u32) -> Vec<u8> {
        format!(r#"{{"ack_file":["{}",{},{}]}}"#, file, offset, size).into_bytes()
    }

    fn handle_put(&mut self, path: &str, body: &[u8]) -> HttpResponse {
        let (file_path, query) = path.split_once('?').unwrap();
        let file = file_path
            .strip_prefix("/push-sequential/unit-7/data/")
            .unwrap()
            .to_string();
        let offset: u32 = query.strip_prefix("offset=").unwrap().parse().unwrap();
        self.puts.push(Put {
            file: file.clone(),
            offset,
            len: body.len(),
        });

        if let Some(budget) = self.accept_budget {
            if budget == 0 {
                return HttpResponse::new(503, b"");
            }
            self.accept_budget = Some(budget - 1);
        }

        let stored = self.stored.entry(file.clone()).or_default();
        let have = stored.len() as u32;
        if offset > have {
            return HttpResponse::new(416, &Self::ack_body(&file, have, have));
        }
        stored.truncate(offset as usize);
        stored.extend_from_slice(body);
        self.accepted.push((file.clone(), offset));

        let accepted = self.puts.len();
        match &self.ack_on_put {
            Some((n, ack_file, ack_offset)) if *n == accepted => {
                HttpResponse::new(200, &Self::ack_body(ack_file, *ack_offset, 0))
            }
            _ => HttpResponse::new(200, b""),
        }
    }
}

impl HttpClient for FakeServer {
    async fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<HttpResponse, HttpError> {
        let path = url.strip_prefix(SERVER).ok_or(HttpError::InvalidUrl)?;
        match method {
            Method::Put => Ok(self.handle_put(path, body)),
            Method::Get => {
                self.get_log.push(path.to_string());
                Ok(self
                    .gets
                    .get(path)
                    .map(|(status, body)| HttpResponse::new(*status, body))
                    .unwrap_or_else(|| HttpResponse::new(404, b"")))
            }
            Method::Post => Ok(HttpResponse::new(405, b"")),
        }
    }
}

fn readings_fs() -> MemoryFs {
    let mut fs = MemoryFs::new();
    fs.put("data/readings-0000.tsv", &pattern(300, 0));
    fs.put("data/readings-0001.tsv", &pattern(50, 100));
    fs
}

fn saved_state(fs: &mut MemoryFs) -> PushSequentialState {
    state_file::load_or_default(fs, STATE)
}

fn done_state(file: &str, size: u32) -> PushSequentialState {
    PushSequentialState {
        current_file: Some(file.to_string()),
        current_offset: Some(size),
        current_size: Some(size),
    }
}

#[test]
fn pushes_whole_directory_in_chunks() {
    let mut fs = readings_fs();
    let mut server = FakeServer::default();
    let mut platform = FakePlatform::new();

    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();

    assert_eq!(report.outcome, PushOutcome::DirComplete);
    assert_eq!(report.chunks_sent, 4);
    assert_eq!(report.bytes_sent, 350);
    let sizes: Vec<usize> = server.puts.iter().map(|put| put.len).collect();
    assert_eq!(sizes, vec![100, 100, 100, 50]);
    assert_eq!(server.offsets(), vec![0, 100, 200, 0]);
    assert_eq!(server.stored("readings-0000.tsv"), pattern(300, 0).as_slice());
    assert_eq!(server.stored("readings-0001.tsv"), pattern(50, 100).as_slice());
    assert_eq!(saved_state(&mut fs), done_state("readings-0001.tsv", 50));
}

#[test]
fn completed_directory_sends_nothing_until_appended() {
    let mut fs = readings_fs();
    let mut server = FakeServer::default();
    let mut platform = FakePlatform::new();
    block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();
    server.puts.clear();

    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();
    assert_eq!(report.chunks_sent, 0);
    assert!(server.puts.is_empty());

    fs.append("data/readings-0001.tsv", &pattern(30, 7)).unwrap();
    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();
    assert_eq!(report.bytes_sent, 30);
    assert_eq!(
        server.puts,
        vec![Put {
            file: "readings-0001.tsv".to_string(),
            offset: 50,
            len: 30
        }]
    );
    assert_eq!(saved_state(&mut fs), done_state("readings-0001.tsv", 80));
}

#[test]
fn interrupted_pushes_converge_without_resending() {
    for accepted_per_attempt in 1..=3 {
        let mut fs = readings_fs();
        let mut server = FakeServer::default();
        let mut platform = FakePlatform::new();

        let mut attempts = 0;
        loop {
            attempts += 1;
            assert!(attempts < 20, "push never completed");
            server.accept_budget = Some(accepted_per_attempt);
            match block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))) {
                Ok(report) => {
                    assert_eq!(report.outcome, PushOutcome::DirComplete);
                    break;
                }
                Err(SyncError::Status(503)) => continue,
                Err(err) => panic!("unexpected error {:?}", err),
            }
        }

        assert_eq!(
            server.accepted,
            vec![
                ("readings-0000.tsv".to_string(), 0),
                ("readings-0000.tsv".to_string(), 100),
                ("readings-0000.tsv".to_string(), 200),
                ("readings-0001.tsv".to_string(), 0),
            ],
            "budget {}",
            accepted_per_attempt
        );
        assert_eq!(server.stored("readings-0000.tsv"), pattern(300, 0).as_slice());
        assert_eq!(server.stored("readings-0001.tsv"), pattern(50, 100).as_slice());
        assert_eq!(saved_state(&mut fs), done_state("readings-0001.tsv", 50));
    }
}

#[test]
fn rejected_chunk_keeps_cursor() {
    let mut fs = readings_fs();
    let mut server = FakeServer {
        accept_budget: Some(1),
        ..FakeServer::default()
    };
    let mut platform = FakePlatform::new();

    let result = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100)));
    assert_eq!(result, Err(SyncError::Status(503)));
    assert_eq!(
        saved_state(&mut fs),
        PushSequentialState {
            current_file: Some("readings-0000.tsv".to_string()),
            current_offset: Some(100),
            current_size: Some(300),
        }
    );
}

#[test]
fn ack_override_rolls_cursor_back() {
    let mut fs = readings_fs();
    let mut server = FakeServer {
        ack_on_put: Some((2, "readings-0000.tsv".to_string(), 50)),
        ..FakeServer::default()
    };
    let mut platform = FakePlatform::new();

    block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();

    assert_eq!(server.offsets(), vec![0, 100, 50, 150, 250, 0]);
    assert_eq!(server.stored("readings-0000.tsv"), pattern(300, 0).as_slice());
}

#[test]
fn range_rejection_with_ack_resyncs_to_server_offset() {
    let mut fs = readings_fs();
    fs.create_dir_all("var").unwrap();
    state_file::save(
        &mut fs,
        STATE,
        &PushSequentialState {
            current_file: Some("readings-0000.tsv".to_string()),
            current_offset: Some(200),
            current_size: Some(300),
        },
    )
    .unwrap();

    let mut server = FakeServer::default();
    server
        .stored
        .insert("readings-0000.tsv".to_string(), pattern(100, 0));
    let mut platform = FakePlatform::new();

    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();
    assert_eq!(report.outcome, PushOutcome::DirComplete);
    assert_eq!(server.offsets(), vec![200, 100, 200, 0]);
    assert_eq!(server.stored("readings-0000.tsv"), pattern(300, 0).as_slice());
}

struct RangeRejecting;

impl HttpClient for RangeRejecting {
    async fn request(&mut self, _: Method, _: &str, _: &[u8]) -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse::new(416, b"{}"))
    }
}

#[test]
fn range_rejection_without_ack_aborts() {
    let mut fs = readings_fs();
    let mut platform = FakePlatform::new();

    let result = block_on(push_sequential(&mut fs, &mut RangeRejecting, &mut platform, &PUSH, limits(100)));
    assert_eq!(result, Err(SyncError::OffsetRejected));
    assert_eq!(saved_state(&mut fs).current_offset, Some(0));
}

#[test]
fn budget_exhaustion_keeps_position_for_next_episode() {
    let mut fs = readings_fs();
    let mut server = FakeServer::default();
    let mut platform = FakePlatform::new();
    platform.tick_per_read_ms = 1_000;

    let budget = PushLimits {
        chunk_size: 100,
        budget_ms: 2_500,
    };
    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, budget)).unwrap();
    assert_eq!(report.outcome, PushOutcome::BudgetExhausted);
    assert_eq!(report.chunks_sent, 2);
    assert_eq!(saved_state(&mut fs).current_offset, Some(200));

    platform.tick_per_read_ms = 0;
    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();
    assert_eq!(report.outcome, PushOutcome::DirComplete);
    assert_eq!(server.offsets(), vec![0, 100, 200, 0]);
}

#[test]
fn operator_interrupt_stops_push() {
    let mut fs = readings_fs();
    let mut server = FakeServer::default();
    let mut platform = FakePlatform::new();
    platform.cancel = true;

    let result = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100)));
    assert_eq!(result, Err(SyncError::Cancelled));
    assert!(server.puts.is_empty());
}

#[test]
fn missing_local_dir_is_trivially_complete() {
    let mut fs = MemoryFs::new();
    let mut server = FakeServer::default();
    let mut platform = FakePlatform::new();

    let report = block_on(push_sequential(&mut fs, &mut server, &mut platform, &PUSH, limits(100))).unwrap();
    assert_eq!(report.outcome, PushOutcome::DirComplete);
    assert_eq!(report.chunks_sent, 0);
}

fn update_server() -> FakeServer {
    let mut server = FakeServer::default();
    server.serve(
        "/updates?recursive=false",
        200,
        br#"["update-0001","update-0002"]"#,
    );
    server.serve(
        "/updates/update-0002?recursive=true",
        200,
        br#"["conf/device.json","notes.txt"]"#,
    );
    server.serve("/updates/update-0002/conf/device.json", 200, br#"{"chunk_size":512}"#);
    server.serve("/updates/update-0002/notes.txt", 200, b"hello");
    server
}

#[test]
fn pull_fetches_newest_dir_through_staging() {
    let mut fs = MemoryFs::new();
    let mut server = update_server();
    let mut platform = FakePlatform::new();

    let outcome = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL)).unwrap();
    assert_eq!(
        outcome,
        PullOutcome::Fetched {
            name: "update-0002".to_string(),
            files: 2
        }
    );
    assert_eq!(
        fs.contents("updates/update-0002/conf/device.json"),
        Some(br#"{"chunk_size":512}"#.as_slice())
    );
    assert_eq!(fs.contents("updates/update-0002/notes.txt"), Some(b"hello".as_slice()));
    assert!(!fs.exists("updates/tmp-update-0002").unwrap());
    assert!(!fs.exists("updates/update-0001").unwrap());

    let again = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL)).unwrap();
    assert_eq!(
        again,
        PullOutcome::UpToDate {
            name: "update-0002".to_string()
        }
    );
}

#[test]
fn pull_reports_missing_remote_dir() {
    let mut fs = MemoryFs::new();
    let mut server = FakeServer::default();
    let mut platform = FakePlatform::new();

    let outcome = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL)).unwrap();
    assert_eq!(outcome, PullOutcome::RemoteMissing);
    assert!(!fs.exists("updates").unwrap());
}

#[test]
fn failed_pull_leaves_no_final_dir_and_is_retried() {
    let mut fs = MemoryFs::new();
    let mut server = update_server();
    server.serve("/updates/update-0002/notes.txt", 500, b"");
    let mut platform = FakePlatform::new();

    let result = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL));
    assert_eq!(result, Err(SyncError::Status(500)));
    assert!(!fs.exists("updates/update-0002").unwrap());
    assert!(fs.exists("updates/tmp-update-0002").unwrap());

    server.serve("/updates/update-0002/notes.txt", 200, b"hello");
    let outcome = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL)).unwrap();
    assert!(outcome.fetched());
    assert!(!fs.exists("updates/tmp-update-0002").unwrap());
    assert_eq!(fs.contents("updates/update-0002/notes.txt"), Some(b"hello".as_slice()));
}

#[test]
fn stale_staging_dir_is_removed_without_touching_completed_dirs() {
    let mut fs = MemoryFs::new();
    fs.put("updates/tmp-update-0002/notes.txt", b"partial");
    fs.put("updates/update-0002/notes.txt", b"complete");
    let mut server = update_server();
    let mut platform = FakePlatform::new();

    let outcome = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL)).unwrap();
    assert_eq!(
        outcome,
        PullOutcome::UpToDate {
            name: "update-0002".to_string()
        }
    );
    assert!(!fs.exists("updates/tmp-update-0002").unwrap());
    assert_eq!(fs.contents("updates/update-0002/notes.txt"), Some(b"complete".as_slice()));
}

#[test]
fn unsafe_listing_is_rejected() {
    let mut fs = MemoryFs::new();
    let mut server = FakeServer::default();
    server.serve("/updates?recursive=false", 200, br#"["update-0003"]"#);
    server.serve("/updates/update-0003?recursive=true", 200, br#"["../boot.py"]"#);
    let mut platform = FakePlatform::new();

    let result = block_on(pull_last_dir(&mut fs, &mut server, &mut platform, &PULL));
    assert_eq!(result, Err(SyncError::BadListing));
    assert!(!fs.exists("updates/update-0003").unwrap());
}
